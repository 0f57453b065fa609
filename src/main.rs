use anyhow::{Context, Result, bail};
use clap::Parser;
use class_organizer::cli::{Cli, Commands, OutputFormat};
use class_organizer::decode::decode_class;
use class_organizer::extract::{Reference, class_references};
use class_organizer::model::ClassModel;
use class_organizer::organize::organize_with;
use class_organizer::scan::{find_class_files, read_classes_from_jar};
use rayon::prelude::*;
use serde::Serialize;
use std::path::Path;
use std::time::Instant;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Organize { input, format, fold_singletons, output } => {
            let result = run_organize(&input, fold_singletons)?;
            write_organize_output(&result, format, output.as_deref())?;
        }
        Commands::Refs { class_file, format } => {
            let result = run_refs(&class_file)?;
            write_refs_output(&result, format)?;
        }
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct PackageEntry {
    package: u32,
    classes: Vec<String>,
}

#[derive(Debug, Serialize)]
struct OrganizeResult {
    input: String,
    class_count: usize,
    package_count: usize,
    duration_ms: u64,
    packages: Vec<PackageEntry>,
}

#[derive(Debug, Serialize)]
struct RefsResult {
    class_file: String,
    class_name: String,
    reference_count: usize,
    references: Vec<Reference>,
}

fn run_organize(input: &Path, fold_singletons: bool) -> Result<OrganizeResult> {
    let start = Instant::now();

    let sources = load_class_bytes(input)?;
    eprintln!("[class-organizer] decoding {} class files", sources.len());

    let models: Vec<ClassModel> = sources
        .par_iter()
        .map(|(label, bytes)| {
            decode_class(bytes).with_context(|| format!("failed to decode {label}"))
        })
        .collect::<Result<_>>()?;

    let class_count = models.len();
    let partition = organize_with(models, fold_singletons)?;
    eprintln!(
        "[class-organizer] {} classes fell into {} packages",
        class_count,
        partition.group_count()
    );

    let packages = partition
        .groups()
        .map(|(group, classes)| PackageEntry {
            package: group,
            classes: classes.iter().cloned().collect(),
        })
        .collect();

    Ok(OrganizeResult {
        input: input.to_string_lossy().to_string(),
        class_count,
        package_count: partition.group_count(),
        duration_ms: start.elapsed().as_millis() as u64,
        packages,
    })
}

fn run_refs(class_file: &Path) -> Result<RefsResult> {
    let bytes = std::fs::read(class_file)
        .with_context(|| format!("failed to read {}", class_file.display()))?;
    let model = decode_class(&bytes)
        .with_context(|| format!("failed to decode {}", class_file.display()))?;

    let mut references = class_references(&model);
    references.sort();
    references.dedup();

    Ok(RefsResult {
        class_file: class_file.to_string_lossy().to_string(),
        class_name: model.name,
        reference_count: references.len(),
        references,
    })
}

/// Collects `(label, bytes)` pairs from a directory tree of `.class` files,
/// a jar/zip archive, or a single class file. Labels are diagnostic only.
fn load_class_bytes(input: &Path) -> Result<Vec<(String, Vec<u8>)>> {
    if input.is_dir() {
        let paths = find_class_files(input)?;
        eprintln!(
            "[class-organizer] found {} class files under {}",
            paths.len(),
            input.display()
        );
        return paths
            .into_iter()
            .map(|path| {
                let bytes = std::fs::read(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                Ok((path.to_string_lossy().to_string(), bytes))
            })
            .collect();
    }

    match input.extension().and_then(|e| e.to_str()) {
        Some("jar") | Some("zip") => {
            let classes = read_classes_from_jar(input)?;
            eprintln!(
                "[class-organizer] found {} class entries in {}",
                classes.len(),
                input.display()
            );
            Ok(classes)
        }
        Some("class") => {
            let bytes = std::fs::read(input)
                .with_context(|| format!("failed to read {}", input.display()))?;
            Ok(vec![(input.to_string_lossy().to_string(), bytes)])
        }
        _ => bail!(
            "unsupported input {}: expected a directory, a .jar/.zip, or a .class file",
            input.display()
        ),
    }
}

fn write_organize_output(
    result: &OrganizeResult,
    format: OutputFormat,
    output: Option<&Path>,
) -> Result<()> {
    let content = match format {
        OutputFormat::Json => serde_json::to_string_pretty(result)?,
        OutputFormat::Text => {
            let mut out = String::new();
            out.push_str(&format!("input: {}\n", result.input));
            out.push_str(&format!("class_count: {}\n", result.class_count));
            out.push_str(&format!("package_count: {}\n", result.package_count));
            out.push_str(&format!("duration_ms: {}\n", result.duration_ms));
            for entry in &result.packages {
                out.push_str(&format!("package {}:\n", entry.package));
                for class in &entry.classes {
                    out.push_str(&format!("  {class}\n"));
                }
            }
            out
        }
    };

    if let Some(path) = output {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
    } else {
        print!("{content}");
        if !content.ends_with('\n') {
            println!();
        }
    }

    Ok(())
}

fn write_refs_output(result: &RefsResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(result)?),
        OutputFormat::Text => {
            println!("class_name: {}", result.class_name);
            println!("reference_count: {}", result.reference_count);
            for reference in &result.references {
                match reference {
                    Reference::Type(name) => println!("type   {name}"),
                    Reference::Member(key) => {
                        println!("member {}.{} {}", key.owner, key.name, key.descriptor)
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_class_bytes_rejects_unknown_extensions() {
        let err = load_class_bytes(Path::new("/tmp/whatever.txt")).unwrap_err();
        assert!(err.to_string().contains("unsupported input"));
    }

    #[test]
    fn organize_output_text_lists_packages() {
        let result = OrganizeResult {
            input: "demo.jar".to_string(),
            class_count: 2,
            package_count: 1,
            duration_ms: 3,
            packages: vec![PackageEntry {
                package: 0,
                classes: vec!["p/A".to_string(), "p/B".to_string()],
            }],
        };
        let tmp = std::env::temp_dir().join(format!(
            "class_organizer_test_{}_main_out.txt",
            std::process::id()
        ));
        write_organize_output(&result, OutputFormat::Text, Some(&tmp)).unwrap();
        let content = std::fs::read_to_string(&tmp).unwrap();
        assert!(content.contains("package_count: 1"));
        assert!(content.contains("  p/A"));
        let _ = std::fs::remove_file(&tmp);
    }
}
