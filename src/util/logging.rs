//! # Logging Utilities
//!
//! Rate limiting for repetitive protocol warnings and hex dumps of frames.
//!
//! An optical head that slips out of alignment produces a CRC error for nearly
//! every frame; `LogThrottle` keeps those from flooding the log while the
//! assembler keeps counting them.
//!
//! ```rust
//! use sml_gridmeter::util::logging::LogThrottle;
//!
//! let mut throttle = LogThrottle::new(1000, 5); // 5 messages per second
//! if throttle.allow() {
//!     log::info!("CRC error");
//! }
//! ```

use std::time::Instant;

/// Lets at most `cap` messages through per `window_ms` and counts the rest.
#[derive(Debug)]
pub struct LogThrottle {
    window_ms: u64,
    cap: u32,
    /// Messages let through in the current window
    passed: u32,
    suppressed: u32,
    window_start: Instant,
}

impl LogThrottle {
    pub fn new(window_ms: u64, cap: u32) -> Self {
        Self {
            window_ms,
            cap,
            passed: 0,
            suppressed: 0,
            window_start: Instant::now(),
        }
    }

    /// Returns true if the caller may log now. A new window opens once the
    /// current one has expired.
    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.window_start).as_millis() > u128::from(self.window_ms) {
            self.window_start = now;
            self.passed = 0;
        }

        if self.passed < self.cap {
            self.passed += 1;
            true
        } else {
            self.suppressed = self.suppressed.saturating_add(1);
            false
        }
    }

    /// Messages dropped since the last call.
    pub fn take_suppressed(&mut self) -> u32 {
        std::mem::take(&mut self.suppressed)
    }

    pub fn reset(&mut self) {
        self.window_start = Instant::now();
        self.passed = 0;
        self.suppressed = 0;
    }
}

/// Trace-level hex dump of a frame, cut off after 64 bytes.
pub fn log_frame_hex(prefix: &str, data: &[u8]) {
    const MAX_LOG_BYTES: usize = 64;

    if !log::log_enabled!(log::Level::Trace) {
        return;
    }

    let shown = &data[..data.len().min(MAX_LOG_BYTES)];
    let hex_str = crate::util::hex::format_hex_compact(shown);
    let suffix = if data.len() > MAX_LOG_BYTES {
        format!(" ... ({} bytes total)", data.len())
    } else {
        String::new()
    };

    log::trace!("{prefix}: {hex_str}{suffix}");
}
