//! The local terminal as a session surface.

use deckhand_bridge::Surface;
use std::io::Write;

/// Writes session output straight to stdout.
#[derive(Debug, Default)]
pub struct StdoutSurface;

impl Surface for StdoutSurface {
    fn write(&mut self, data: &str) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(data.as_bytes());
        let _ = out.flush();
    }
}
