use anyhow::{Context, Result};
use ignore::WalkBuilder;
use memmap2::Mmap;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use zip::ZipArchive;

/// Finds every `.class` file under `root` with a parallel directory walk.
pub fn find_class_files(root: &Path) -> Result<Vec<PathBuf>> {
    let (tx, rx) = mpsc::channel();

    let walker = WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .build_parallel();

    walker.run(|| {
        let tx = tx.clone();
        Box::new(move |entry| {
            if let Ok(entry) = entry {
                let path = entry.path();
                if path.extension().is_some_and(|e| e == "class") {
                    let _ = tx.send(path.to_path_buf());
                }
            }
            ignore::WalkState::Continue
        })
    });

    drop(tx);
    let mut paths: Vec<PathBuf> = rx.iter().collect();
    paths.sort();
    Ok(paths)
}

/// Reads every `.class` entry out of a jar, returning `(entry name, bytes)`
/// pairs. The entry name is only a diagnostic label; class identity comes
/// from the decoded `this_class` name.
pub fn read_classes_from_jar(jar_path: &Path) -> Result<Vec<(String, Vec<u8>)>> {
    let file = File::open(jar_path)
        .with_context(|| format!("failed to open jar: {}", jar_path.display()))?;
    // SAFETY: The file is opened read-only and remains valid for the lifetime of the mmap.
    // The mmap is dropped before the file, ensuring memory safety.
    let mmap = unsafe { Mmap::map(&file) }
        .with_context(|| format!("failed to mmap jar: {}", jar_path.display()))?;
    let mut archive = ZipArchive::new(Cursor::new(&mmap[..]))
        .with_context(|| format!("failed to read zip structure: {}", jar_path.display()))?;

    let mut classes = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if !entry.name().ends_with(".class") {
            continue;
        }
        let name = entry.name().to_string();
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut bytes)
            .with_context(|| format!("failed to read jar entry {name}"))?;
        classes.push((name, bytes));
    }
    classes.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(classes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_path(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!(
            "class_organizer_test_{}_{}_{}",
            std::process::id(),
            nanos,
            name
        ))
    }

    #[test]
    fn find_class_files_filters_by_extension() {
        let base = temp_path("scan_dir");
        fs::create_dir_all(base.join("p")).unwrap();
        fs::write(base.join("p/A.class"), b"x").unwrap();
        fs::write(base.join("p/B.class"), b"x").unwrap();
        fs::write(base.join("p/notes.txt"), b"x").unwrap();

        let found = find_class_files(&base).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|p| p.extension().is_some_and(|e| e == "class")));

        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn read_classes_from_jar_returns_class_entries() {
        let jar = temp_path("scan.jar");
        let file = fs::File::create(&jar).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default();

        zip.start_file("p/A.class", options).unwrap();
        zip.write_all(b"aaaa").unwrap();
        zip.start_file("META-INF/MANIFEST.MF", options).unwrap();
        zip.write_all(b"Manifest-Version: 1.0").unwrap();
        zip.finish().unwrap();

        let classes = read_classes_from_jar(&jar).unwrap();
        assert_eq!(classes, vec![("p/A.class".to_string(), b"aaaa".to_vec())]);

        let _ = fs::remove_file(&jar);
    }
}
