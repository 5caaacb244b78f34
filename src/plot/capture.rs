//! Visualization Capturer

use super::render::render;
use super::{png, FigureRegistry};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, warn};

/// One captured chart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visualization {
    pub mime_type: String,
    /// Base64-encoded image bytes
    pub data: String,
    pub title: Option<String>,
    pub width: u32,
    pub height: u32,
}

impl Visualization {
    /// Decoded image bytes
    pub fn bytes(&self) -> Option<Vec<u8>> {
        STANDARD.decode(&self.data).ok()
    }
}

/// Serialize open figures in creation order, then clear the registry. Figures
/// still unrendered when `deadline` passes are dropped.
pub fn capture(registry: &mut FigureRegistry, deadline: Option<Instant>) -> Vec<Visualization> {
    let mut out = Vec::with_capacity(registry.len());
    for (n, figure) in registry.figures().iter().enumerate() {
        let Some(canvas) = render(figure, deadline) else {
            warn!(
                skipped = registry.len() - n,
                "capture deadline passed, remaining figures dropped"
            );
            break;
        };
        match png::encode_rgb(canvas.width, canvas.height, &canvas.pixels) {
            Ok(bytes) => out.push(Visualization {
                mime_type: "image/png".to_string(),
                data: STANDARD.encode(bytes),
                title: figure.display_title(),
                width: canvas.width,
                height: canvas.height,
            }),
            Err(e) => warn!(figure = figure.id, error = %e, "failed to encode figure"),
        }
    }
    debug!(count = out.len(), "captured figures");
    registry.clear();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plot::Artist;

    #[test]
    fn test_capture_encodes_and_clears() {
        let mut reg = FigureRegistry::default();
        let first = reg.new_figure(None, 1, 1).unwrap();
        reg.axes_mut(first, 0).unwrap().title = Some("Sales".to_string());
        let second = reg.new_figure(Some((2.0, 2.0)), 1, 1).unwrap();
        reg.axes_mut(second, 0).unwrap().artists.push(Artist::Line {
            xs: vec![0.0, 1.0],
            ys: vec![1.0, 2.0],
        });

        let charts = capture(&mut reg, None);
        assert!(reg.is_empty());
        assert_eq!(charts.len(), 2);
        assert_eq!(charts[0].title.as_deref(), Some("Sales"));
        assert_eq!((charts[1].width, charts[1].height), (200, 200));
        let bytes = charts[1].bytes().unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }

    #[test]
    fn test_capture_past_deadline_still_clears() {
        let mut reg = FigureRegistry::default();
        reg.new_figure(None, 1, 1).unwrap();
        reg.new_figure(None, 1, 1).unwrap();

        let charts = capture(&mut reg, Some(Instant::now()));
        assert!(charts.is_empty());
        assert!(reg.is_empty());
    }
}
