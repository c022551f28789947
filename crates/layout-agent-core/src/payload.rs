//! Structured payload extraction
//!
//! The model answers in free-form text that embeds one JSON object such as
//! `{"main_beams": [{"start": {"x": 0, "y": 0}, "end": {"x": 6000, "y": 0}}]}`.
//! Coordinates are millimetres in the plan's XY frame.

use serde::{Deserialize, Serialize};

/// Plan point in millimetres
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2D {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// One main beam centre line
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: Point2D,
    pub end: Point2D,
}

impl Segment {
    pub fn new(start: Point2D, end: Point2D) -> Self {
        Self { start, end }
    }

    /// Length in millimetres
    pub fn length(&self) -> f64 {
        (self.end.x - self.start.x).hypot(self.end.y - self.start.y)
    }
}

#[derive(Debug, Deserialize)]
struct RawSegment {
    #[serde(default)]
    start: Option<Point2D>,
    #[serde(default)]
    end: Option<Point2D>,
}

#[derive(Debug, Deserialize)]
struct MainBeamsRoot {
    #[serde(default)]
    main_beams: Option<Vec<Option<RawSegment>>>,
}

/// What a model answer yielded
#[derive(Debug, Clone, PartialEq)]
pub enum MainBeams {
    /// At least one complete segment, in answer order
    Parsed(Vec<Segment>),
    /// The text contains no balanced JSON object
    NoJson,
    /// A JSON object was found but `main_beams` is absent or empty
    NoBeams,
}

/// Return the first balanced `{...}` object in `text`.
///
/// Scanning starts at the first `{`. Braces inside string literals are not
/// counted; backslash escapes inside strings are honoured. Returns `None`
/// when there is no `{` or the depth never returns to zero.
pub fn extract_first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    // Delimiters are ASCII, so byte offsets always land on char boundaries
    for (offset, byte) in text.as_bytes()[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if *byte == b'\\' {
                escaped = true;
            } else if *byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Decode the `main_beams` list from a JSON object.
///
/// A missing or empty list yields `Ok(None)`. Entries without both end
/// points are dropped. Malformed JSON is an error.
pub fn parse_main_beams(json: &str) -> Result<Option<Vec<Segment>>, serde_json::Error> {
    let root: MainBeamsRoot = serde_json::from_str(json)?;
    let segments: Vec<Segment> = root
        .main_beams
        .unwrap_or_default()
        .into_iter()
        .flatten()
        .filter_map(|raw| Some(Segment::new(raw.start?, raw.end?)))
        .collect();

    if segments.is_empty() {
        Ok(None)
    } else {
        Ok(Some(segments))
    }
}

/// Extract and decode the main beams carried by a full model answer
pub fn main_beams_from_answer(text: &str) -> Result<MainBeams, serde_json::Error> {
    let Some(json) = extract_first_json_object(text) else {
        return Ok(MainBeams::NoJson);
    };
    Ok(match parse_main_beams(json)? {
        Some(segments) => MainBeams::Parsed(segments),
        None => MainBeams::NoBeams,
    })
}
