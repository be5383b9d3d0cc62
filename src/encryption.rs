//! Encryption manifest
//!
//! When fonts are obfuscated, the container must carry a
//! `META-INF/encryption.xml` naming every obfuscated resource together with
//! the algorithm used, so that reading systems know what to undo.

use std::io::{self, Cursor};

use quick_xml::{
    Writer,
    events::{BytesDecl, BytesEnd, BytesStart, Event},
};

use crate::{error::PackagingError, types::FontResource};

/// Location of the encryption manifest inside the container
pub const ENCRYPTION_XML_PATH: &str = "META-INF/encryption.xml";

type XmlWriter = Writer<Cursor<Vec<u8>>>;

/// Renders `encryption.xml` for the obfuscated fonts
///
/// Fonts without an obfuscation algorithm are skipped. Entries appear in
/// the order the fonts are given.
pub fn encryption_xml<'a, I>(fonts: I) -> Result<Vec<u8>, PackagingError>
where
    I: IntoIterator<Item = &'a FontResource>,
{
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_error)?;
    writer
        .write_event(Event::Start(BytesStart::new("encryption").with_attributes([
            ("xmlns", "urn:oasis:names:tc:opendocument:xmlns:container"),
            ("xmlns:enc", "http://www.w3.org/2001/04/xmlenc#"),
        ])))
        .map_err(xml_error)?;

    for font in fonts {
        if let Some(algorithm) = font.algorithm {
            make_encrypted_data(&mut writer, algorithm.uri(), &font.relative_path)?;
        }
    }

    writer
        .write_event(Event::End(BytesEnd::new("encryption")))
        .map_err(xml_error)?;

    Ok(writer.into_inner().into_inner())
}

fn make_encrypted_data(writer: &mut XmlWriter, method: &str, uri: &str) -> Result<(), PackagingError> {
    writer
        .write_event(Event::Start(BytesStart::new("enc:EncryptedData")))
        .map_err(xml_error)?;
    writer
        .write_event(Event::Empty(
            BytesStart::new("enc:EncryptionMethod").with_attributes([("Algorithm", method)]),
        ))
        .map_err(xml_error)?;
    writer
        .write_event(Event::Start(BytesStart::new("enc:CipherData")))
        .map_err(xml_error)?;
    writer
        .write_event(Event::Empty(
            BytesStart::new("enc:CipherReference").with_attributes([("URI", uri)]),
        ))
        .map_err(xml_error)?;
    writer
        .write_event(Event::End(BytesEnd::new("enc:CipherData")))
        .map_err(xml_error)?;
    writer
        .write_event(Event::End(BytesEnd::new("enc:EncryptedData")))
        .map_err(xml_error)?;

    Ok(())
}

fn xml_error<E>(err: E) -> PackagingError
where
    E: std::error::Error + Send + Sync + 'static,
{
    PackagingError::store(ENCRYPTION_XML_PATH, io::Error::other(err))
}
