//! Epub export library
//!
//! A Rust library for packaging a folder of book resources into an EPUB container.
//!
//! The library consumes an already materialized publication (package document,
//! navigation, content documents, fonts, `META-INF/container.xml`, ...) and
//! produces the final `.epub` file. It does not generate book content itself.
//!
//! ## Features
//!
//! - Writes a specification-compliant container: the `mimetype` entry comes first
//!   and is stored uncompressed, every other file is deflated.
//! - Reproducible entry order for the same input tree.
//! - IDPF and Adobe font obfuscation, with the key taken from the identifier
//!   each algorithm requires.
//! - Generates `META-INF/encryption.xml` for obfuscated fonts.
//! - Stages the publication in a temporary folder that is always cleaned up.
//!
//! ## Quick Start
//!
//! ```rust, ignore
//! # use epub_export::export::EpubExporter;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut exporter = EpubExporter::new("path/to/book/folder");
//! exporter.set_publication_identifier("urn:isbn:9780000000001");
//!
//! exporter.export("path/to/output.epub")?;
//! # Ok(())
//! # }
//! ```
//!
//! Lower-level building blocks are available as well:
//! [archive::write_archive] packs any folder into an EPUB container, and
//! [obfuscation::obfuscate_font] obfuscates a single font file in place.

pub(crate) mod utils;

pub mod archive;
pub mod encryption;
pub mod error;
pub mod export;
pub mod obfuscation;
pub mod types;
