//! Remote capability seam for oxidiana: text generation (plain and streamed),
//! speech synthesis and image synthesis.

pub mod http;
pub mod provider;
