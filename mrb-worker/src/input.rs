use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use tracing::{debug, info};
use walkdir::WalkDir;

use common::codec::decode_line;
use common::{FrozenJobConfig, KeyValue, MrError, Result};
use mrb_runtime::{InputSource, Split};

/// How a line of text becomes a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineFormat {
    /// Key is the byte offset of the line within its file, value the line.
    Offset,
    /// Key and value are separated by the first tab.
    KeyValue,
}

/// Reads job input from local text files.
///
/// Input paths may name files, directories (read recursively) or glob
/// patterns. Files whose name starts with `_` or `.` are skipped.
#[derive(Debug, Clone)]
pub struct TextInput {
    format: LineFormat,
    lines_per_split: Option<usize>,
}

impl TextInput {
    pub fn new(format: LineFormat, lines_per_split: Option<usize>) -> Self {
        Self {
            format,
            lines_per_split: lines_per_split.filter(|n| *n > 0),
        }
    }
}

impl InputSource for TextInput {
    fn splits(&self, job: &FrozenJobConfig) -> Result<Vec<Split>> {
        let files = expand_paths(&job.input_paths)?;
        info!(files = files.len(), "expanded input paths");

        let mut splits = vec![];
        for path in files {
            match self.lines_per_split {
                None => {
                    let records = FileRecords::new(path, self.format);
                    splits.push(Split::new(splits.len(), records));
                }
                Some(n) => {
                    let file = File::open(&path).map_err(|e| open_error(&path, e))?;
                    let records = LineRecords::new(BufReader::new(file), self.format, path.clone())
                        .collect::<anyhow::Result<Vec<_>>>()
                        .map_err(|e| MrError::Input(format!("{e:#}")))?;
                    for chunk in records.chunks(n) {
                        splits.push(Split::from_records(splits.len(), chunk.to_vec()));
                    }
                }
            }
        }
        debug!(splits = splits.len(), "input splits ready");
        Ok(splits)
    }
}

fn open_error(path: &Path, e: std::io::Error) -> MrError {
    MrError::Input(format!("unable to open {}: {e}", path.display()))
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|name| {
            let name = name.to_string_lossy();
            name.starts_with('_') || name.starts_with('.')
        })
        .unwrap_or(false)
}

/// Resolve input paths to a sorted list of files.
pub fn expand_paths(paths: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = vec![];
    for pattern in paths {
        let matched: Vec<PathBuf> = if pattern.contains(['*', '?', '[']) {
            glob::glob(pattern)
                .map_err(|e| MrError::Input(format!("bad glob pattern `{pattern}`: {e}")))?
                .filter_map(|entry| entry.ok())
                .collect()
        } else {
            vec![PathBuf::from(pattern)]
        };

        let before = files.len();
        for path in matched {
            if path.is_dir() {
                let mut found: Vec<PathBuf> = WalkDir::new(&path)
                    .into_iter()
                    .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.path()))
                    .filter_map(|entry| entry.ok())
                    .filter(|entry| entry.file_type().is_file())
                    .map(|entry| entry.into_path())
                    .collect();
                found.sort();
                files.extend(found);
            } else if path.is_file() && !is_hidden(&path) {
                files.push(path);
            }
        }
        if files.len() == before {
            return Err(MrError::Input(format!("input path `{pattern}` matches no files")));
        }
    }
    Ok(files)
}

/// The records of one file. The file is opened on the first read and
/// closed once its last line was read.
struct FileRecords {
    path: PathBuf,
    format: LineFormat,
    lines: Option<LineRecords<BufReader<File>>>,
    finished: bool,
}

impl FileRecords {
    fn new(path: PathBuf, format: LineFormat) -> Self {
        Self {
            path,
            format,
            lines: None,
            finished: false,
        }
    }
}

impl Iterator for FileRecords {
    type Item = anyhow::Result<KeyValue>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if self.lines.is_none() {
            match File::open(&self.path) {
                Ok(file) => {
                    debug!(path = %self.path.display(), "opened input file");
                    let reader = BufReader::new(file);
                    self.lines = Some(LineRecords::new(reader, self.format, self.path.clone()));
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(anyhow!("unable to open {}: {e}", self.path.display())));
                }
            }
        }

        let next = self.lines.as_mut().and_then(Iterator::next);
        if next.is_none() {
            self.finished = true;
            self.lines = None;
        }
        next
    }
}

/// Lazily reads the lines of one file as records.
struct LineRecords<R> {
    reader: R,
    format: LineFormat,
    path: PathBuf,
    offset: u64,
    failed: bool,
}

impl<R: BufRead> LineRecords<R> {
    fn new(reader: R, format: LineFormat, path: PathBuf) -> Self {
        Self {
            reader,
            format,
            path,
            offset: 0,
            failed: false,
        }
    }
}

impl<R: BufRead> Iterator for LineRecords<R> {
    type Item = anyhow::Result<KeyValue>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let mut line = String::new();
        let read = match self
            .reader
            .read_line(&mut line)
            .with_context(|| format!("unable to read {} at byte {}", self.path.display(), self.offset))
        {
            Ok(read) => read,
            Err(e) => {
                self.failed = true;
                return Some(Err(e));
            }
        };
        if read == 0 {
            return None;
        }

        let offset = self.offset;
        self.offset += read as u64;
        let text = line.trim_end_matches(['\n', '\r']);
        Some(Ok(match self.format {
            LineFormat::Offset => KeyValue::new(offset.to_string(), text),
            LineFormat::KeyValue => decode_line(text),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::JobConfig;
    use std::fs;

    fn job(paths: Vec<String>) -> FrozenJobConfig {
        let mut job = JobConfig::new("test");
        job.set_input_paths(paths);
        job.freeze()
    }

    fn collect(split: Split) -> Vec<String> {
        split.map(|r| r.unwrap().to_string()).collect()
    }

    #[test]
    fn one_split_per_file_keyed_by_offset() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "the cat\r\nsat\n").unwrap();
        fs::write(dir.path().join("b.txt"), "dog").unwrap();
        fs::write(dir.path().join("_SUCCESS"), "").unwrap();

        let input = TextInput::new(LineFormat::Offset, None);
        let splits = input
            .splits(&job(vec![dir.path().display().to_string()]))
            .unwrap();

        assert_eq!(splits.len(), 2);
        let mut splits = splits.into_iter();
        assert_eq!(collect(splits.next().unwrap()), vec!["0\tthe cat", "9\tsat"]);
        assert_eq!(collect(splits.next().unwrap()), vec!["0\tdog"]);
    }

    #[test]
    fn files_are_opened_when_their_split_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let kept = dir.path().join("a.txt");
        let removed = dir.path().join("b.txt");
        fs::write(&kept, "kept\n").unwrap();
        fs::write(&removed, "gone\n").unwrap();

        let input = TextInput::new(LineFormat::Offset, None);
        let splits = input
            .splits(&job(vec![dir.path().display().to_string()]))
            .unwrap();
        fs::remove_file(&removed).unwrap();

        let mut splits = splits.into_iter();
        assert_eq!(collect(splits.next().unwrap()), vec!["0\tkept"]);

        let mut unreadable = splits.next().unwrap();
        let err = unreadable.next().unwrap().unwrap_err();
        assert!(err.to_string().contains("unable to open"));
        assert!(unreadable.next().is_none());
    }

    #[test]
    fn lines_per_split_chunks_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lines.txt");
        fs::write(&path, "1\n2\n3\n4\n5\n").unwrap();

        let input = TextInput::new(LineFormat::Offset, Some(2));
        let splits = input.splits(&job(vec![path.display().to_string()])).unwrap();

        let sizes: Vec<usize> = splits.into_iter().map(|s| s.count()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn key_value_lines_split_on_tab() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairs.tsv");
        fs::write(&path, "the\t2\ncat\t1\n").unwrap();

        let input = TextInput::new(LineFormat::KeyValue, None);
        let mut splits = input.splits(&job(vec![path.display().to_string()])).unwrap();
        assert_eq!(collect(splits.remove(0)), vec!["the\t2", "cat\t1"]);
    }

    #[test]
    fn globs_expand_and_missing_paths_fail() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x.log"), "x").unwrap();
        fs::write(dir.path().join("y.log"), "y").unwrap();
        fs::write(dir.path().join("z.txt"), "z").unwrap();

        let pattern = format!("{}/*.log", dir.path().display());
        let files = expand_paths(&[pattern]).unwrap();
        assert_eq!(files.len(), 2);

        let missing = dir.path().join("nope").display().to_string();
        assert!(matches!(expand_paths(&[missing]), Err(MrError::Input(_))));
    }
}
