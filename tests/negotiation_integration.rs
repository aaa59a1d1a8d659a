use std::sync::Arc;

use lamco_datatransfer::config::DataTransferConfig;
use lamco_datatransfer::flavor::{self, Flavor, Representation};
use lamco_datatransfer::format::{format_id, Format};
use lamco_datatransfer::ranking::{standard_encodings, CharsetRanker, RankTables, Selection};
use lamco_datatransfer::translate::{DataTransferer, TextTransferable};

fn windows_engine() -> DataTransferer {
    DataTransferConfig::windows_defaults().build_transferer().unwrap()
}

fn flavor(s: &str) -> Flavor {
    Flavor::parse(s).unwrap()
}

#[test]
fn test_text_source_exports_text_formats() {
    let engine = windows_engine();
    let ranked = engine.formats_for_transferable(&TextTransferable::new("hello"));

    assert_eq!(
        ranked.formats(),
        vec![
            Format(format_id::CF_UNICODETEXT),
            Format(format_id::CF_TEXT),
            Format(format_id::CF_OEMTEXT),
        ]
    );
    for (_, chosen) in ranked.iter() {
        assert_eq!(*chosen, flavor::string_flavor());
    }
}

#[test]
fn test_preferred_flavor_formats_come_first() {
    let engine = windows_engine();
    let html = flavor("text/html; class=string");
    let plain = flavor("text/plain; class=string");

    let ranked = engine.index().formats_for_flavors(&[html.clone(), plain.clone()]);
    let formats = ranked.formats();
    assert_eq!(formats[0], Format(format_id::CF_HTML));
    assert_eq!(ranked.get(Format(format_id::CF_HTML)), Some(&html));
    assert_eq!(ranked.get(Format(format_id::CF_UNICODETEXT)), Some(&plain));
}

#[test]
fn test_import_binds_flavor_to_its_preferred_format() {
    let engine = windows_engine();
    let plain = flavor("text/plain; class=string");

    let both = engine
        .index()
        .flavors_for_formats(&[Format(format_id::CF_TEXT), Format(format_id::CF_UNICODETEXT)]);
    assert_eq!(both.get(&plain), Some(&Format(format_id::CF_UNICODETEXT)));
    assert_eq!(both.get(&flavor::string_flavor()), Some(&Format(format_id::CF_UNICODETEXT)));

    let ansi_only = engine.index().flavors_for_formats(&[Format(format_id::CF_TEXT)]);
    assert_eq!(ansi_only.get(&plain), Some(&Format(format_id::CF_TEXT)));
}

#[test]
fn test_import_sorted_best_first() {
    let engine = windows_engine();
    let sorted = engine
        .index()
        .flavors_for_formats_sorted(&[Format(format_id::CF_UNICODETEXT)]);

    assert_eq!(sorted.first(), Some(&flavor("text/plain; class=reader")));
    assert_eq!(sorted.last(), Some(&flavor::string_flavor()));

    // Every decoded text flavor outranks every encoded one
    let first_encoded = sorted
        .iter()
        .position(|f| f.representation().is_encoded_text())
        .unwrap();
    assert!(sorted[..first_encoded]
        .iter()
        .all(|f| f.representation().is_decoded_text()));
}

#[test]
fn test_file_and_image_formats_import() {
    let engine = windows_engine();
    let flavors = engine.index().flavors_for_formats(&[
        Format(format_id::CF_HDROP),
        Format(format_id::CF_PNG),
        Format(format_id::CF_DIB),
    ]);

    assert_eq!(flavors.get(&flavor::file_list_flavor()), Some(&Format(format_id::CF_HDROP)));
    // PNG is listed before DIB in the table
    assert_eq!(flavors.get(&flavor::image_flavor()), Some(&Format(format_id::CF_PNG)));
}

#[test]
fn test_unregistered_format_yields_nothing() {
    let engine = windows_engine();
    assert!(engine.index().flavors_for_formats(&[Format(0xBEEF)]).is_empty());
    assert!(engine
        .index()
        .formats_for_flavors(&[flavor("application/x-unknown; class=char-buffer")])
        .is_empty());
}

#[test]
fn test_application_beats_text_across_branches() {
    let engine = windows_engine();
    let ranker = engine.index().ranker(Selection::Best);

    let mut flavors = vec![
        flavor("text/plain; class=byte-array; charset=UTF-8"),
        flavor("application/x-custom; class=stream"),
    ];
    ranker.sort(&mut flavors);
    assert_eq!(flavors[0].primary_type(), "application");
}

#[test]
fn test_charset_ranking_with_legacy_default() {
    let tables = Arc::new(RankTables::new("windows-1252"));
    let ranker = CharsetRanker::new(Arc::clone(&tables), Selection::Best);

    let mut names = vec!["US-ASCII", "UNSUPPORTED-XYZ", "windows-1252", "UTF-16"];
    ranker.sort(&mut names);
    assert_eq!(names, vec!["UTF-16", "windows-1252", "US-ASCII", "UNSUPPORTED-XYZ"]);

    let worst = CharsetRanker::new(tables, Selection::Worst);
    names.sort_by(|a, b| worst.compare(a, b));
    assert_eq!(names, vec!["UNSUPPORTED-XYZ", "US-ASCII", "windows-1252", "UTF-16"]);
}

#[test]
fn test_standard_encodings_best_first() {
    let tables = Arc::new(RankTables::default());
    let encodings = standard_encodings(&tables);

    assert_eq!(encodings.first().map(String::as_str), Some("UTF-16"));
    assert_eq!(encodings.last().map(String::as_str), Some("US-ASCII"));
    assert_eq!(encodings.iter().filter(|e| e.as_str() == "UTF-8").count(), 1);
}

#[test]
fn test_convertibility() {
    let engine = windows_engine();
    let index = engine.index();

    assert!(index.is_convertible(&flavor::string_flavor()));
    assert!(index.is_convertible(&flavor::file_list_flavor()));
    assert!(index.is_convertible(&flavor::image_flavor()));
    assert!(index.is_convertible(&flavor("application/x-thing; class=remote")));
    assert!(index.is_convertible(&flavor("application/x-thing; class=stream")));
    assert!(!index.is_convertible(&flavor("application/x-thing; class=reader")));
    assert!(flavor("text/plain; class=reader").representation() == Representation::Reader);
}
