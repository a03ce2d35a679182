//! File loader.
//!
//! Loads command template files and test documents from disk.

use crate::document::{ParseError, Test};
use crate::schema::CommandTemplateFile;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for loading operations.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Failed to read a file.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Failed to parse YAML.
    #[error("invalid YAML in {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    /// Failed to parse TOML.
    #[error("invalid TOML in {}: {source}", path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    /// Failed to parse a test document.
    #[error("invalid test document {}: {source}", path.display())]
    Document {
        path: PathBuf,
        #[source]
        source: ParseError,
    },
    /// Unsupported file extension.
    #[error("unsupported file format: {0} (expected .yaml, .yml, or .toml)")]
    UnsupportedFormat(String),
    /// The fixtures root does not exist.
    #[error("fixtures root not found: {}", .0.display())]
    MissingFixtures(PathBuf),
}

/// File extension of test documents.
pub const TEST_EXTENSION: &str = "t";

const TEMPLATE_EXTENSIONS: &[&str] = &["yaml", "yml", "toml"];

fn read(path: &Path) -> Result<String, LoadError> {
    std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Load a command template file.
pub fn load_template_file(path: &Path) -> Result<CommandTemplateFile, LoadError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let contents = read(path)?;

    match ext {
        "yaml" | "yml" => {
            CommandTemplateFile::from_yaml_str(&contents).map_err(|source| LoadError::Yaml {
                path: path.to_path_buf(),
                source,
            })
        }
        "toml" => CommandTemplateFile::from_toml_str(&contents).map_err(|source| LoadError::Toml {
            path: path.to_path_buf(),
            source,
        }),
        other => Err(LoadError::UnsupportedFormat(other.to_string())),
    }
}

/// Load a test document. Its name defaults to the file stem.
pub fn load_test(path: &Path) -> Result<Test, LoadError> {
    let contents = read(path)?;
    let mut test = contents.parse::<Test>().map_err(|source| LoadError::Document {
        path: path.to_path_buf(),
        source,
    })?;
    if test.name.is_empty()
        && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
    {
        test.name = stem.to_string();
    }
    Ok(test)
}

/// Find all template files in a directory, or return the single file.
pub fn find_template_files(path: &Path) -> Result<Vec<PathBuf>, LoadError> {
    find_files(path, TEMPLATE_EXTENSIONS)
}

/// Find all test documents in a directory, or return the single file.
pub fn find_tests(path: &Path) -> Result<Vec<PathBuf>, LoadError> {
    find_files(path, &[TEST_EXTENSION])
}

fn find_files(path: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>, LoadError> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    collect_recursive(path, extensions, &mut files).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    files.sort();
    Ok(files)
}

fn collect_recursive(
    dir: &Path,
    extensions: &[&str],
    files: &mut Vec<PathBuf>,
) -> Result<(), std::io::Error> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            collect_recursive(&path, extensions, files)?;
        } else if let Some(ext) = path.extension().and_then(|e| e.to_str())
            && extensions.contains(&ext)
        {
            files.push(path);
        }
    }
    Ok(())
}
