//! # Utility Types
//!
//! Small helpers shared by the transport sessions.
//!
//! ## Bitrate sampling
//!
//! ```rust,no_run
//! use rtspcast::utils::BitrateCalculator;
//!
//! # async fn example() {
//! let calculator = BitrateCalculator::new(|bps| println!("{} bit/s", bps));
//! calculator.start();
//! calculator.add(1200);
//! calculator.stop();
//! # }
//! ```

/// Throughput sampler for the send loops
pub mod bitrate;

pub use bitrate::BitrateCalculator;
