use image::{imageops, GenericImageView, RgbaImage};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Scales origin and size independently per axis, truncating.
    pub fn scaled(&self, scale: Scale) -> Self {
        Self {
            x: (scale.x * f64::from(self.x)) as u32,
            y: (scale.y * f64::from(self.y)) as u32,
            width: (scale.x * f64::from(self.width)) as u32,
            height: (scale.y * f64::from(self.height)) as u32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    pub x: f64,
    pub y: f64,
}

impl Scale {
    pub const IDENTITY: Scale = Scale { x: 1.0, y: 1.0 };
}

/// Logical size of the game surface and, when stretched mode is on, the size
/// it is actually drawn at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceDimensions {
    pub logical: Size,
    pub stretched: Option<Size>,
}

impl SurfaceDimensions {
    pub const fn unstretched(logical: Size) -> Self {
        Self {
            logical,
            stretched: None,
        }
    }

    /// Factor that maps interface coordinates onto frame pixels.
    pub fn scale(&self) -> Scale {
        match self.stretched {
            Some(actual) if self.logical.width > 0 && self.logical.height > 0 => Scale {
                x: f64::from(actual.width) / f64::from(self.logical.width),
                y: f64::from(actual.height) / f64::from(self.logical.height),
            },
            _ => Scale::IDENTITY,
        }
    }
}

/// A rendered frame and the interface bounds to cut out of it, with the
/// stretch correction already applied to `region`.
#[derive(Debug, Clone)]
pub struct FrameCapture {
    pub image: RgbaImage,
    pub region: Rect,
}

impl FrameCapture {
    pub fn new(image: RgbaImage, bounds: Rect, scale: Scale) -> Self {
        Self {
            image,
            region: bounds.scaled(scale),
        }
    }

    /// Cuts the region out of the frame. Regions that overhang the frame are
    /// clipped to it; `None` when nothing of the region is left.
    pub fn crop(&self) -> Option<RgbaImage> {
        let Rect {
            x,
            y,
            width,
            height,
        } = self.region;
        let view = imageops::crop_imm(&self.image, x, y, width, height);
        let (width, height) = view.dimensions();
        if width == 0 || height == 0 {
            return None;
        }
        Some(view.to_image())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| Rgba([x as u8, y as u8, (x ^ y) as u8, 255]))
    }

    #[test]
    fn unit_scale_matches_direct_crop() {
        let frame = gradient(64, 48);
        let bounds = Rect::new(5, 7, 20, 10);
        let capture = FrameCapture::new(frame.clone(), bounds, Scale::IDENTITY);

        let direct = imageops::crop_imm(&frame, 5, 7, 20, 10).to_image();
        assert_eq!(capture.region, bounds);
        assert_eq!(capture.crop().unwrap().as_raw(), direct.as_raw());
    }

    #[test]
    fn double_scale_doubles_origin_and_size() {
        let frame = gradient(128, 96);
        let capture = FrameCapture::new(frame, Rect::new(5, 7, 20, 10), Scale { x: 2.0, y: 2.0 });

        assert_eq!(capture.region, Rect::new(10, 14, 40, 20));
        let cropped = capture.crop().unwrap();
        assert_eq!(cropped.dimensions(), (40, 20));
        assert_eq!(cropped.get_pixel(0, 0), &Rgba([10, 14, 10 ^ 14, 255]));
    }

    #[test]
    fn stretched_surface_yields_per_axis_ratio() {
        let surface = SurfaceDimensions {
            logical: Size::new(765, 503),
            stretched: Some(Size::new(1530, 1006)),
        };
        assert_eq!(surface.scale(), Scale { x: 2.0, y: 2.0 });
        assert_eq!(
            SurfaceDimensions::unstretched(Size::new(765, 503)).scale(),
            Scale::IDENTITY
        );
    }

    #[test]
    fn overhanging_region_is_clipped() {
        let capture = FrameCapture::new(gradient(10, 10), Rect::new(6, 6, 10, 10), Scale::IDENTITY);
        assert_eq!(capture.crop().unwrap().dimensions(), (4, 4));
    }

    #[test]
    fn region_outside_the_frame_crops_to_nothing() {
        let outside = FrameCapture::new(gradient(100, 80), Rect::new(500, 500, 40, 20), Scale::IDENTITY);
        assert!(outside.crop().is_none());

        let empty = FrameCapture::new(gradient(100, 80), Rect::new(5, 5, 0, 10), Scale::IDENTITY);
        assert!(empty.crop().is_none());
    }
}
