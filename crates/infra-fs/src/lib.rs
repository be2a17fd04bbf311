// Jobflow File Record Sources
//
// Parsing happens on a blocking thread; records reach the importer through a bounded channel.

mod csv_format;
mod jsonl_format;
mod opener;
mod stream;

pub use opener::FileSourceOpener;
pub use stream::StreamingSource;
