use std::{
    collections::HashSet,
    io::{Cursor, Write},
};

use zip::{result::ZipResult, write::SimpleFileOptions, CompressionMethod, ZipWriter};

use crate::util::security::split_extension;

/// Builds a deflate ZIP from `(filename, bytes)` pairs.
/// Repeated names get a ` (n)` suffix before the extension.
pub fn build_zip<'a, I>(entries: I) -> ZipResult<Vec<u8>>
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut used = HashSet::new();

    for (filename, data) in entries {
        let name = unique_name(filename, &mut used);
        writer.start_file(name, options)?;
        writer.write_all(data)?;
    }

    Ok(writer.finish()?.into_inner())
}

fn unique_name(filename: &str, used: &mut HashSet<String>) -> String {
    if used.insert(filename.to_owned()) {
        return filename.to_owned();
    }

    let (stem, extension) = split_extension(filename);
    let mut counter = 1;
    loop {
        let candidate = format!("{} ({}){}", stem, counter, extension);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use zip::ZipArchive;

    use super::*;

    #[test]
    fn duplicate_names_are_suffixed() {
        let bytes = build_zip([
            ("photo.png", b"one".as_slice()),
            ("photo.png", b"two".as_slice()),
            ("photo.png", b"three".as_slice()),
            ("other.jpg", b"four".as_slice()),
        ])
        .unwrap();

        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut names: Vec<String> = archive.file_names().map(str::to_owned).collect();
        names.sort();
        assert_eq!(
            names,
            vec!["other.jpg", "photo (1).png", "photo (2).png", "photo.png"]
        );

        let mut content = String::new();
        archive
            .by_name("photo (1).png")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "two");
    }

    #[test]
    fn empty_archives_are_valid() {
        let bytes = build_zip(std::iter::empty::<(&str, &[u8])>()).unwrap();
        assert_eq!(ZipArchive::new(Cursor::new(bytes)).unwrap().len(), 0);
    }
}
