// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Checks that sources stay within the width set in rustfmt.toml

use camino::Utf8Path;
use camino::Utf8PathBuf;

const MAX_WIDTH: usize = 80;

fn rust_sources(dir: &Utf8Path, files: &mut Vec<Utf8PathBuf>) {
    for entry in dir.read_dir_utf8().unwrap() {
        let path = entry.unwrap().into_path();
        if path.is_dir() {
            rust_sources(&path, files);
        } else if path.extension() == Some("rs") {
            files.push(path);
        }
    }
}

#[test]
fn test_sources_fit_max_width() {
    let manifest_dir = Utf8Path::new(env!("CARGO_MANIFEST_DIR"));
    let mut files = Vec::new();
    rust_sources(&manifest_dir.join("src"), &mut files);
    rust_sources(&manifest_dir.join("tests"), &mut files);
    assert!(!files.is_empty());

    let mut too_wide = Vec::new();
    for file in &files {
        let contents = std::fs::read_to_string(file).unwrap();
        for (i, line) in contents.lines().enumerate() {
            if line.chars().count() > MAX_WIDTH {
                too_wide.push(format!("{}:{}", file, i + 1));
            }
        }
    }
    assert!(
        too_wide.is_empty(),
        "lines over {} columns: {:#?}",
        MAX_WIDTH,
        too_wide
    );
}
