//! Signal processing for SSVEP windows
//!
//! This module provides the numeric building blocks of the decoder:
//! - [`ring_buffer`]: Circular sample store and window extraction
//! - [`filters`]: Biquad sections, Butterworth band-pass, zero-phase filtering
//! - [`preprocess`]: Line-noise removal, baseline removal, band isolation
//! - [`reference`]: Harmonic sine/cosine references
//! - [`cca`]: Leading canonical correlation

pub mod cca;
pub mod filters;
pub mod preprocess;
pub mod reference;
pub mod ring_buffer;

pub use cca::leading_canonical_correlation;
pub use filters::{Biquad, BiquadCoeffs, SosFilter};
pub use preprocess::Preprocessor;
pub use reference::{harmonic_reference, ReferenceEntry, ReferenceSet};
pub use ring_buffer::RingBuffer;
