//! Recognition of `<variationN>` records in streamed model output.

pub mod extract;
pub mod record;
pub mod stream;

pub use record::Variation;
pub use stream::VariationStream;
