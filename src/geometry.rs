//! Frame space to display space mapping.
//!
//! Aspect-fit: the frame is scaled uniformly until it touches the view on one
//! axis and centred on the other. Nothing is cropped or stretched.

use serde::Serialize;

use crate::detect::BoundingBox;
use crate::error::PipelineError;

/// Uniform scale plus offset, optionally followed by a horizontal mirror.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ViewTransform {
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
    /// Mirror mapped x coordinates across a view of this width.
    pub mirror_width: Option<f32>,
}

impl ViewTransform {
    pub fn identity() -> Self {
        Self {
            scale: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
            mirror_width: None,
        }
    }

    /// The same mapping, flipped left to right for a mirrored preview.
    pub fn mirrored(mut self, view_width: f32) -> Self {
        self.mirror_width = Some(view_width);
        self
    }

    pub fn map_rect(&self, bounds: &BoundingBox) -> DisplayRect {
        map_rect(bounds, self)
    }

    fn map_x(&self, x: i32) -> f32 {
        let x = x as f32 * self.scale + self.offset_x;
        match self.mirror_width {
            Some(width) => width - x,
            None => x,
        }
    }

    fn map_y(&self, y: i32) -> f32 {
        y as f32 * self.scale + self.offset_y
    }
}

/// A rectangle in display coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct DisplayRect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl DisplayRect {
    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }
}

/// Aspect-fit transform from a `frame_width` x `frame_height` frame into a
/// `view_width` x `view_height` view.
pub fn compute_transform(
    frame_width: i32,
    frame_height: i32,
    view_width: i32,
    view_height: i32,
) -> Result<ViewTransform, PipelineError> {
    if frame_width <= 0 || frame_height <= 0 {
        return Err(PipelineError::invalid_input(format!(
            "frame extent {}x{} is degenerate",
            frame_width, frame_height
        )));
    }
    if view_width <= 0 || view_height <= 0 {
        return Err(PipelineError::invalid_input(format!(
            "view extent {}x{} is degenerate",
            view_width, view_height
        )));
    }

    let (fw, fh) = (frame_width as f32, frame_height as f32);
    let (vw, vh) = (view_width as f32, view_height as f32);
    let scale = (vw / fw).min(vh / fh);
    Ok(ViewTransform {
        scale,
        offset_x: (vw - fw * scale) / 2.0,
        offset_y: (vh - fh * scale) / 2.0,
        mirror_width: None,
    })
}

/// Map both corners of `bounds`. Mirroring swaps left and right so the result
/// stays well-ordered.
pub fn map_rect(bounds: &BoundingBox, transform: &ViewTransform) -> DisplayRect {
    let (a, b) = (transform.map_x(bounds.left), transform.map_x(bounds.right));
    DisplayRect {
        left: a.min(b),
        top: transform.map_y(bounds.top),
        right: a.max(b),
        bottom: transform.map_y(bounds.bottom),
    }
}

/// Holds the transform currently in use and recomputes it on demand.
///
/// A failed update leaves the previous transform in place.
#[derive(Clone, Debug, Default)]
pub struct CoordinateMapper {
    current: Option<ViewTransform>,
    front_facing: bool,
}

impl CoordinateMapper {
    pub fn new(front_facing: bool) -> Self {
        Self {
            current: None,
            front_facing,
        }
    }

    pub fn current(&self) -> Option<ViewTransform> {
        self.current
    }

    pub fn front_facing(&self) -> bool {
        self.front_facing
    }

    pub fn update(
        &mut self,
        frame_width: i32,
        frame_height: i32,
        view_width: i32,
        view_height: i32,
    ) -> Result<ViewTransform, PipelineError> {
        let mut transform = compute_transform(frame_width, frame_height, view_width, view_height)?;
        if self.front_facing {
            transform = transform.mirrored(view_width as f32);
        }
        if self.current != Some(transform) {
            log::debug!(
                "view transform: scale {:.4}, offset ({:.1}, {:.1}), mirrored {}",
                transform.scale,
                transform.offset_x,
                transform.offset_y,
                transform.mirror_width.is_some()
            );
        }
        self.current = Some(transform);
        Ok(transform)
    }

    pub fn map(&self, bounds: &BoundingBox) -> Option<DisplayRect> {
        self.current.map(|transform| map_rect(bounds, &transform))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn halves_into_a_matching_aspect() {
        let t = compute_transform(640, 480, 320, 240).unwrap();
        assert_eq!(t.scale, 0.5);
        assert_eq!(t.offset_x, 0.0);
        assert_eq!(t.offset_y, 0.0);
    }

    #[test]
    fn letterboxes_the_shorter_dimension() {
        // min(480/640, 480/480) = 0.75; 480 * 0.75 = 360, centred in 480.
        let t = compute_transform(640, 480, 480, 480).unwrap();
        assert_eq!(t.scale, 0.75);
        assert_eq!(t.offset_x, 0.0);
        assert_eq!(t.offset_y, 60.0);
    }

    #[test]
    fn pillarboxes_a_tall_frame_in_a_wide_view() {
        let t = compute_transform(480, 640, 1280, 640).unwrap();
        assert_eq!(t.scale, 1.0);
        assert_eq!(t.offset_x, 400.0);
        assert_eq!(t.offset_y, 0.0);
    }

    #[test]
    fn identity_maps_box_to_itself() {
        let bounds = BoundingBox::new(10, 20, 110, 220);
        let rect = ViewTransform::identity().map_rect(&bounds);
        assert_eq!(
            rect,
            DisplayRect {
                left: 10.0,
                top: 20.0,
                right: 110.0,
                bottom: 220.0
            }
        );
    }

    #[test]
    fn mirrored_rect_stays_ordered() {
        let t = ViewTransform::identity().mirrored(100.0);
        let rect = t.map_rect(&BoundingBox::new(10, 0, 30, 5));
        assert_eq!(rect.left, 70.0);
        assert_eq!(rect.right, 90.0);
        assert_eq!(rect.width(), 20.0);
    }

    #[test]
    fn degenerate_extents_are_invalid_input() {
        for (fw, fh, vw, vh) in [(0, 480, 320, 240), (640, -1, 320, 240), (640, 480, 0, 240)] {
            let err = compute_transform(fw, fh, vw, vh).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput);
        }
    }

    #[test]
    fn mapper_keeps_previous_transform_on_failure() {
        let mut mapper = CoordinateMapper::new(false);
        assert!(mapper.current().is_none());
        let good = mapper.update(640, 480, 320, 240).unwrap();
        assert!(mapper.update(0, 480, 320, 240).is_err());
        assert_eq!(mapper.current(), Some(good));
        let rect = mapper.map(&BoundingBox::new(0, 0, 64, 48)).unwrap();
        assert_eq!(rect.right, 32.0);
    }

    #[test]
    fn front_facing_mapper_mirrors() {
        let mut mapper = CoordinateMapper::new(true);
        let t = mapper.update(640, 480, 320, 240).unwrap();
        assert_eq!(t.mirror_width, Some(320.0));
        let rect = mapper.map(&BoundingBox::new(0, 0, 64, 48)).unwrap();
        assert_eq!((rect.left, rect.right), (288.0, 320.0));
    }
}
