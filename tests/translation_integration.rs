use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::DynamicImage;
use lamco_datatransfer::config::DataTransferConfig;
use lamco_datatransfer::error::{DataTransferError, Result};
use lamco_datatransfer::flavor::{self, Flavor};
use lamco_datatransfer::format::{format_id, Format};
use lamco_datatransfer::translate::{DataTransferer, TextTransferable, TransferValue, Transferable};
use tempfile::TempDir;

fn windows_engine() -> DataTransferer {
    DataTransferConfig::windows_defaults().build_transferer().unwrap()
}

/// Source offering a list of files
struct FileSource(Vec<PathBuf>);

impl Transferable for FileSource {
    fn transfer_flavors(&self) -> Vec<Flavor> {
        vec![flavor::file_list_flavor()]
    }

    fn transfer_data(&self, flavor: &Flavor) -> Result<Option<TransferValue>> {
        if *flavor == flavor::file_list_flavor() {
            Ok(Some(TransferValue::FileList(self.0.clone())))
        } else {
            Err(DataTransferError::unsupported("not offered"))
        }
    }
}

/// Source that only supplies a text encoding name
struct LocaleSource(&'static str);

impl Transferable for LocaleSource {
    fn transfer_flavors(&self) -> Vec<Flavor> {
        vec![flavor::text_encoding_flavor()]
    }

    fn transfer_data(&self, _: &Flavor) -> Result<Option<TransferValue>> {
        Ok(Some(TransferValue::ByteArray(self.0.as_bytes().to_vec())))
    }
}

fn touch(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"data").unwrap();
    std::fs::canonicalize(path).unwrap()
}

#[test]
fn test_text_to_ansi_and_unicode() {
    let engine = windows_engine();
    let source = TextTransferable::new("a\nb");

    let ansi = engine
        .translate_transferable(&source, &flavor::string_flavor(), Format(format_id::CF_TEXT))
        .unwrap()
        .unwrap();
    assert_eq!(ansi, b"a\r\nb\0");

    let unicode = engine
        .translate_transferable(&source, &flavor::string_flavor(), Format(format_id::CF_UNICODETEXT))
        .unwrap()
        .unwrap();
    assert_eq!(unicode, [b'a', 0, b'\r', 0, b'\n', 0, b'b', 0, 0, 0]);
}

#[test]
fn test_text_roundtrip_through_every_text_format() {
    let engine = windows_engine();
    let source = TextTransferable::new("line one\nline two\n");

    for id in [format_id::CF_UNICODETEXT, format_id::CF_TEXT, format_id::CF_OEMTEXT] {
        let format = Format(id);
        let bytes = engine
            .translate_transferable(&source, &flavor::string_flavor(), format)
            .unwrap()
            .unwrap();
        let value = engine
            .translate_bytes(&bytes, &flavor::string_flavor(), format, None)
            .unwrap()
            .unwrap();
        assert_eq!(value.into_text().unwrap(), "line one\nline two\n", "format {id}");
    }
}

#[test]
fn test_decode_stops_at_terminator() {
    let engine = windows_engine();
    let bytes = b"hi\r\nthere\0garbage";
    let value = engine
        .translate_bytes(bytes, &flavor::string_flavor(), Format(format_id::CF_TEXT), None)
        .unwrap()
        .unwrap();
    assert_eq!(value.into_text().unwrap(), "hi\nthere");
}

#[test]
fn test_locale_dependent_charset() {
    let engine = windows_engine();
    let format = Format(format_id::CF_TEXT);

    assert_eq!(engine.best_charset_for_format(format, None).unwrap(), "windows-1252");
    assert_eq!(
        engine.best_charset_for_format(format, Some(&LocaleSource("IBM437"))).unwrap(),
        "IBM437"
    );
    // Not locale dependent: the source is ignored
    assert_eq!(
        engine
            .best_charset_for_format(Format(format_id::CF_UNICODETEXT), Some(&LocaleSource("IBM437")))
            .unwrap(),
        "UTF-16LE"
    );

    let value = engine
        .translate_bytes(&[0x82, 0], &flavor::string_flavor(), format, Some(&LocaleSource("IBM437")))
        .unwrap()
        .unwrap();
    assert_eq!(value.into_text().unwrap(), "é");

    let value = engine
        .translate_bytes(&[0x82, 0], &flavor::string_flavor(), format, None)
        .unwrap()
        .unwrap();
    assert_eq!(value.into_text().unwrap(), "\u{201A}");
}

#[test]
fn test_file_list_drops_unreadable_files() {
    let dir = TempDir::new().unwrap();
    let public = touch(dir.path(), "public.txt");
    let secret = touch(dir.path(), "secret.txt");

    let engine = windows_engine().with_read_permission(Arc::new(|path: &Path| {
        !path.to_string_lossy().contains("secret")
    }));
    let source = FileSource(vec![public.clone(), secret]);

    let hdrop = engine
        .translate_transferable(&source, &flavor::file_list_flavor(), Format(format_id::CF_HDROP))
        .unwrap()
        .unwrap();
    let value = engine
        .translate_bytes(&hdrop, &flavor::file_list_flavor(), Format(format_id::CF_HDROP), None)
        .unwrap()
        .unwrap();

    match value {
        TransferValue::FileList(paths) => assert_eq!(paths, vec![public]),
        other => panic!("unexpected value: {other:?}"),
    }
}

#[test]
fn test_file_list_unrestricted_keeps_everything() {
    let dir = TempDir::new().unwrap();
    let a = touch(dir.path(), "a.txt");
    let missing = dir.path().join("missing.txt");

    let engine = windows_engine();
    let source = FileSource(vec![a.clone(), missing.clone()]);

    let hdrop = engine
        .translate_transferable(&source, &flavor::file_list_flavor(), Format(format_id::CF_HDROP))
        .unwrap()
        .unwrap();
    let value = engine
        .translate_bytes(&hdrop, &flavor::file_list_flavor(), Format(format_id::CF_HDROP), None)
        .unwrap()
        .unwrap();
    assert!(matches!(value, TransferValue::FileList(paths) if paths == vec![a, missing]));
}

#[test]
fn test_uri_list_roundtrip() {
    let dir = TempDir::new().unwrap();
    let a = touch(dir.path(), "with space.txt");

    let engine = windows_engine();
    let format = Format(format_id::CF_URI_LIST);
    let bytes = engine
        .translate_transferable(&FileSource(vec![a.clone()]), &flavor::file_list_flavor(), format)
        .unwrap()
        .unwrap();

    let text = String::from_utf8(bytes.clone()).unwrap();
    assert!(text.starts_with("file://"));
    assert!(text.ends_with("\r\n"));
    assert!(text.contains("with%20space.txt"));

    let value = engine
        .translate_bytes(&bytes, &flavor::file_list_flavor(), format, None)
        .unwrap()
        .unwrap();
    assert!(matches!(value, TransferValue::FileList(paths) if paths == vec![a]));
}

#[test]
fn test_file_format_requires_file_list_flavor() {
    let engine = windows_engine();
    let err = engine
        .translate_transferable(
            &TextTransferable::new("x"),
            &flavor::string_flavor(),
            Format(format_id::CF_HDROP),
        )
        .unwrap_err();
    assert!(matches!(err, DataTransferError::UnsupportedConversion(_)));
}

#[test]
fn test_suspected_uri_entries_removed() {
    let dir = TempDir::new().unwrap();
    let a = touch(dir.path(), "a.txt");
    let b = touch(dir.path(), "b.txt");
    let secret = touch(dir.path(), "secret.txt");
    let missing = dir.path().join("gone.txt");

    let config = DataTransferConfig::from_toml_str(
        r#"
        [[formats]]
        id = 49664
        name = "UriText"
        flavors = ["text/uri-list"]
        text = { charset = "UTF-8" }
        "#,
    )
    .unwrap();
    let engine = config
        .build_transferer()
        .unwrap()
        .with_read_permission(Arc::new(|path: &Path| !path.to_string_lossy().contains("secret")));

    struct UriText(String);
    impl Transferable for UriText {
        fn transfer_flavors(&self) -> Vec<Flavor> {
            vec![Flavor::parse("text/uri-list; class=string").unwrap()]
        }
        fn transfer_data(&self, _: &Flavor) -> Result<Option<TransferValue>> {
            Ok(Some(TransferValue::Text(self.0.clone())))
        }
    }

    let listing = [&a, &missing, &secret, &b]
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join("\n");
    let source = UriText(listing);
    let flavor = source.transfer_flavors().remove(0);

    let bytes = engine
        .translate_transferable(&source, &flavor, Format(49664))
        .unwrap()
        .unwrap();
    assert_eq!(
        String::from_utf8(bytes).unwrap(),
        format!("{}\r\n{}", a.display(), b.display())
    );
}

#[test]
fn test_dib_image_roundtrip() {
    struct ImageSource;
    impl Transferable for ImageSource {
        fn transfer_flavors(&self) -> Vec<Flavor> {
            vec![flavor::image_flavor()]
        }
        fn transfer_data(&self, _: &Flavor) -> Result<Option<TransferValue>> {
            Ok(Some(TransferValue::Image(DynamicImage::new_rgba8(3, 2))))
        }
    }

    let engine = windows_engine();
    for id in [format_id::CF_DIB, format_id::CF_PNG] {
        let bytes = engine
            .translate_transferable(&ImageSource, &flavor::image_flavor(), Format(id))
            .unwrap()
            .unwrap();
        let value = engine
            .translate_bytes(&bytes, &flavor::image_flavor(), Format(id), None)
            .unwrap()
            .unwrap();
        match value {
            TransferValue::Image(img) => assert_eq!((img.width(), img.height()), (3, 2)),
            other => panic!("unexpected value: {other:?}"),
        }
    }
}

#[test]
fn test_unsupported_charset_flavor_is_not_text() {
    let config = DataTransferConfig::from_toml_str(
        "[[formats]]\nid = 50000\nname = \"Odd\"\nflavors = [\"text/plain\"]\ntext = { charset = \"UTF-8\", terminators = 1 }\n",
    )
    .unwrap();
    let engine = config.build_transferer().unwrap();

    // A charset nobody supports makes the flavor opaque bytes
    let flavor = Flavor::parse("text/plain; charset=X-NOPE; class=byte-array").unwrap();
    let value = engine
        .translate_bytes(b"abc\0", &flavor, Format(50000), None)
        .unwrap()
        .unwrap();
    assert_eq!(value.into_bytes().unwrap(), b"abc\0");

    let flavor = Flavor::parse("text/plain; charset=UTF-16BE; class=byte-array").unwrap();
    let value = engine
        .translate_bytes(b"abc\0", &flavor, Format(50000), None)
        .unwrap()
        .unwrap();
    assert_eq!(value.into_bytes().unwrap(), [0, b'a', 0, b'b', 0, b'c']);
}

/// Source offering UTF-8 bytes as a byte-array text flavor
struct Utf8BytesSource(&'static str);

impl Utf8BytesSource {
    fn flavor() -> Flavor {
        Flavor::parse("text/plain; charset=UTF-8; class=byte-array").unwrap()
    }
}

impl Transferable for Utf8BytesSource {
    fn transfer_flavors(&self) -> Vec<Flavor> {
        vec![Self::flavor()]
    }

    fn transfer_data(&self, _: &Flavor) -> Result<Option<TransferValue>> {
        Ok(Some(TransferValue::ByteArray(self.0.as_bytes().to_vec())))
    }
}

#[test]
fn test_utf8_bytes_export_reencoded() {
    let engine = windows_engine();
    let source = Utf8BytesSource("é\n");

    let ranked = engine.formats_for_transferable(&source);
    assert_eq!(
        ranked.formats(),
        vec![
            Format(format_id::CF_UNICODETEXT),
            Format(format_id::CF_TEXT),
            Format(format_id::CF_OEMTEXT),
        ]
    );
    assert_eq!(ranked.get(Format(format_id::CF_UNICODETEXT)), Some(&Utf8BytesSource::flavor()));

    let unicode = engine
        .translate_transferable(&source, &Utf8BytesSource::flavor(), Format(format_id::CF_UNICODETEXT))
        .unwrap()
        .unwrap();
    assert_eq!(unicode, [0xE9, 0, b'\r', 0, b'\n', 0, 0, 0]);

    let ansi = engine
        .translate_transferable(&source, &Utf8BytesSource::flavor(), Format(format_id::CF_TEXT))
        .unwrap()
        .unwrap();
    assert_eq!(ansi, [0xE9, b'\r', b'\n', 0]);
}

#[test]
fn test_native_text_imported_in_other_charset() {
    let engine = windows_engine();
    let flavor = Flavor::parse("text/html; charset=UTF-16BE; class=byte-array").unwrap();

    let flavors = engine.index().flavors_for_formats(&[Format(format_id::CF_HTML)]);
    assert_eq!(flavors.get(&flavor), Some(&Format(format_id::CF_HTML)));

    let value = engine
        .translate_bytes(b"<b>\0", &flavor, Format(format_id::CF_HTML), None)
        .unwrap()
        .unwrap();
    assert_eq!(value.into_bytes().unwrap(), [0, b'<', 0, b'b', 0, b'>']);
}
