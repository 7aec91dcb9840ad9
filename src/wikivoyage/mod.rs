//! Wikivoyage guide pages: fetching, sectioning and listing extraction.

mod fetcher;
pub mod markup;
mod parser;
pub mod text;

pub use fetcher::{FetchError, MarkupSource, WikivoyageFetcher, DEFAULT_API_URL};
pub use parser::{Listing, ListingParser, ParsedPage, ParserConfig};
