//! Overlay model: what a renderer needs to draw the published state.
//!
//! Strings, colours and rectangle positions only. Drawing is up to the
//! consumer.

use serde::Serialize;

use crate::detect::Probability;
use crate::emotion::{EmotionCategory, EmotionState};
use crate::geometry::DisplayRect;
use crate::publish::{Observation, Snapshot};

/// Vertical room a face label needs below its box.
const LABEL_CLEARANCE: f32 = 150.0;
/// Gap between a box and a label drawn below it.
const LABEL_GAP: f32 = 50.0;

/// ARGB colour.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Color(pub u32);

impl Color {
    pub const GREEN: Color = Color(0xFF00_FF00);
    pub const YELLOW: Color = Color(0xFFFF_FF00);
    pub const WHITE: Color = Color(0xFFFF_FFFF);
    pub const BLUE: Color = Color(0xFF00_00FF);
    pub const GRAY: Color = Color(0xFF88_8888);
    pub const RED: Color = Color(0xFFFF_0000);
    /// Half-transparent black behind the summary panel.
    pub const SCRIM: Color = Color(0x8000_0000);

    pub fn alpha(self) -> u8 {
        (self.0 >> 24) as u8
    }

    pub fn hex(self) -> String {
        format!("#{:08X}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TextSize {
    Title,
    Body,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TextLine {
    pub text: String,
    pub color: Color,
    pub size: TextSize,
}

impl TextLine {
    fn new(text: String, color: Color, size: TextSize) -> Self {
        Self { text, color, size }
    }
}

/// Box and label for one face.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FaceLabel {
    pub rect: DisplayRect,
    pub box_color: Color,
    /// Baseline of the first label line.
    pub label_x: f32,
    pub label_y: f32,
    pub lines: Vec<TextLine>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Overlay {
    /// Summary of the primary face, drawn on `panel_color`.
    pub panel: Vec<TextLine>,
    pub panel_color: Color,
    pub faces: Vec<FaceLabel>,
}

pub fn category_text(category: EmotionCategory) -> &'static str {
    match category {
        EmotionCategory::Happy => "😊 Happy",
        EmotionCategory::Smiling => "😄 Smiling",
        EmotionCategory::Neutral => "😐 Neutral",
        EmotionCategory::Sleepy => "😴 Sleepy",
        EmotionCategory::Unknown => "❓ Unknown",
    }
}

pub fn category_color(category: EmotionCategory) -> Color {
    match category {
        EmotionCategory::Happy => Color::GREEN,
        EmotionCategory::Smiling => Color::YELLOW,
        EmotionCategory::Neutral => Color::WHITE,
        EmotionCategory::Sleepy => Color::BLUE,
        EmotionCategory::Unknown => Color::GRAY,
    }
}

fn eye_color(open: bool) -> Color {
    if open {
        Color::GREEN
    } else {
        Color::RED
    }
}

fn eye_glyph(open: bool) -> &'static str {
    if open {
        "👁️"
    } else {
        "😑"
    }
}

/// `45.0%`, or `--` when the detector gave nothing.
pub fn percent(probability: Probability) -> String {
    match probability.value() {
        Some(value) => format!("{:.1}%", value * 100.0),
        None => "--".to_string(),
    }
}

/// The four summary lines for one face.
pub fn panel_lines(state: &EmotionState) -> Vec<TextLine> {
    attribute_lines(state, TextSize::Title)
}

/// Category, smile and both eyes. Only the category line takes `heading`.
fn attribute_lines(state: &EmotionState, heading: TextSize) -> Vec<TextLine> {
    let category = state.category();
    vec![
        TextLine::new(
            category_text(category).to_string(),
            category_color(category),
            heading,
        ),
        TextLine::new(
            format!("Smile: {}", percent(state.smile())),
            Color::WHITE,
            TextSize::Body,
        ),
        TextLine::new(
            format!(
                "Your Left Eye: {} {}",
                percent(state.left_eye_open()),
                eye_glyph(state.is_left_eye_open())
            ),
            eye_color(state.is_left_eye_open()),
            TextSize::Body,
        ),
        TextLine::new(
            format!(
                "Your Right Eye: {} {}",
                percent(state.right_eye_open()),
                eye_glyph(state.is_right_eye_open())
            ),
            eye_color(state.is_right_eye_open()),
            TextSize::Body,
        ),
    ]
}

/// Where a face label starts: below the box, or above it when the label
/// would run off the bottom of the view.
pub fn label_baseline(rect: &DisplayRect, view_height: f32) -> f32 {
    if rect.bottom + LABEL_CLEARANCE > view_height {
        rect.top - LABEL_CLEARANCE
    } else {
        rect.bottom + LABEL_GAP
    }
}

/// Overlay for a snapshot. Faces without display bounds get no box.
pub fn build_overlay(snapshot: &Snapshot, view_height: f32) -> Overlay {
    let panel = snapshot
        .primary()
        .map(|face| panel_lines(&face.emotion))
        .unwrap_or_default();
    let faces = snapshot
        .faces
        .iter()
        .filter_map(|face| {
            let rect = face.display_bounds?;
            let box_color = category_color(face.emotion.category());
            Some(FaceLabel {
                rect,
                box_color,
                label_x: rect.left,
                label_y: label_baseline(&rect, view_height),
                lines: attribute_lines(&face.emotion, TextSize::Body),
            })
        })
        .collect();
    Overlay {
        panel,
        panel_color: Color::SCRIM,
        faces,
    }
}

/// One-line summary of an observation, for logs and plain terminals.
pub fn status_line(observation: &Observation) -> String {
    let mut line = match observation.snapshot.as_deref() {
        None => "waiting for first detection".to_string(),
        Some(snapshot) => match snapshot.primary() {
            None => format!("frame #{}: no face", snapshot.frame.sequence),
            Some(face) => {
                let state = &face.emotion;
                format!(
                    "frame #{}: {} | smile {} | left eye {} | right eye {}{}",
                    snapshot.frame.sequence,
                    category_text(state.category()),
                    percent(state.smile()),
                    percent(state.left_eye_open()),
                    percent(state.right_eye_open()),
                    match snapshot.faces.len() {
                        1 => String::new(),
                        n => format!(" (+{} more)", n - 1),
                    }
                )
            }
        },
    };
    if let Some(error) = &observation.error {
        line.push_str(&format!(" [error: {}]", error));
    }
    line
}
