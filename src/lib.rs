#![forbid(unsafe_code)]

pub mod assemble;
pub mod browser;
pub mod build;
pub mod cancellation;
pub mod cli;
pub mod epub;
pub mod error;
pub mod formats;
pub mod gaps;
pub mod harvest;
pub mod imaging;
pub mod label;
pub mod logging;
pub mod markup;
pub mod numbering;
pub mod ocr;
pub mod page_store;
pub mod pdf;
pub mod profile;
pub mod retry;
pub mod sequence;
