//! On-disk inputs for image upload tests.
#![allow(dead_code)]

use std::path::Path;

use scan_relay_client::models::event::{NewImageUpload, NewScan};

/// Write a small valid PNG and return its path.
pub fn write_png(dir: &Path, name: &str) -> String {
    let path = dir.join(name);
    image::RgbImage::from_pixel(8, 8, image::Rgb([200, 40, 40]))
        .save(&path)
        .expect("write png");
    path.display().to_string()
}

/// Write bytes that are not any image format.
pub fn write_garbage(dir: &Path, name: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, b"definitely not an image").expect("write file");
    path.display().to_string()
}

pub fn scan(barcode: &str) -> NewScan {
    NewScan {
        barcode: barcode.to_string(),
        symbology: "ean_13".to_string(),
    }
}

pub fn image(path: &str, image_id: &str) -> NewImageUpload {
    let size = std::fs::metadata(path).map(|m| m.len() as i64).unwrap_or(0);
    NewImageUpload {
        path: path.to_string(),
        size,
        image_id: image_id.to_string(),
    }
}
