use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::State;
use crate::error::{FilterError, Result};
use crate::manifest::{LinePolicy, ManifestItem, ManifestReader};
use crate::sampling::SamplingStrategy;
use crate::vector_index::VectorStoreIndex;

/// One manifest to filter and where to write the result.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FilterJob {
    pub manifest: PathBuf,
    pub output: PathBuf,
}

impl FilterJob {
    pub fn new(manifest: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            manifest: manifest.into(),
            output: output.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    pub manifest: PathBuf,
    pub output: PathBuf,
    pub lines_read: usize,
    pub emitted: usize,
    /// Key absent from the vector store.
    pub dropped: usize,
    pub normalized: usize,
    pub blank: usize,
    /// Matched but not chosen by the sampling strategy.
    pub sampled_out: usize,
}

/// Filters label manifests down to the keys present in a vector store.
pub struct VectorListFilter {
    index: VectorStoreIndex,
    line_policy: LinePolicy,
    sampling: SamplingStrategy,
    create_dirs: bool,
    parallel: bool,
}

impl VectorListFilter {
    pub fn new(index: VectorStoreIndex, state: &State) -> Self {
        Self {
            index,
            line_policy: state.line_policy,
            sampling: state.sampling.clone(),
            create_dirs: state.create_dirs,
            parallel: state.parallel,
        }
    }

    pub fn open(vector_file: &Path, state: &State) -> Result<Self> {
        let start = Instant::now();
        let index = VectorStoreIndex::open(vector_file)?;
        info!(
            vector_file = %vector_file.display(),
            keys = index.len(),
            elapsed = ?start.elapsed(),
            "loaded vector keys"
        );
        Ok(Self::new(index, state))
    }

    /// Runs every job against the shared index.
    ///
    /// All inputs are checked before any output is touched.
    pub fn run(&self, jobs: &[FilterJob]) -> Result<Vec<FilterStats>> {
        validate_jobs(jobs)?;

        if self.parallel && jobs.len() > 1 {
            debug!(jobs = jobs.len(), "filtering manifests in parallel");
            jobs.par_iter().map(|job| self.filter_job(job)).collect()
        } else {
            jobs.iter().map(|job| self.filter_job(job)).collect()
        }
    }

    pub fn filter_job(&self, job: &FilterJob) -> Result<FilterStats> {
        let reader = ManifestReader::open(&job.manifest, self.line_policy)?;

        if self.create_dirs {
            if let Some(parent) = job.output.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|e| FilterError::io(parent, e))?;
            }
        }
        let file = File::create(&job.output).map_err(|e| FilterError::io(&job.output, e))?;
        let mut writer = BufWriter::new(file);

        let mut stats = self.filter_to_writer(reader, &mut writer, &job.output)?;
        writer
            .flush()
            .map_err(|e| FilterError::io(&job.output, e))?;

        stats.manifest = job.manifest.clone();
        stats.output = job.output.clone();
        info!(
            manifest = %job.manifest.display(),
            output = %job.output.display(),
            read = stats.lines_read,
            emitted = stats.emitted,
            dropped = stats.dropped,
            "filtered manifest"
        );
        Ok(stats)
    }

    /// Streams `reader` into `writer`, keeping lines whose key is indexed.
    pub fn filter_to_writer<R: BufRead, W: Write>(
        &self,
        reader: ManifestReader<R>,
        writer: &mut W,
        output: &Path,
    ) -> Result<FilterStats> {
        let manifest = reader.path().to_path_buf();
        let mut stats = FilterStats::default();
        let mut pending = Vec::new();

        for item in reader {
            stats.lines_read += 1;
            let line = match item? {
                ManifestItem::Blank => {
                    stats.blank += 1;
                    continue;
                }
                ManifestItem::Line(line) => line,
            };

            if !self.index.contains(&line.key) {
                stats.dropped += 1;
                continue;
            }
            if line.normalized {
                warn!(
                    manifest = %manifest.display(),
                    line = line.line_number,
                    key = %line.key,
                    "line has no label, writing empty label"
                );
                stats.normalized += 1;
            }

            if self.sampling.is_streaming() {
                writer
                    .write_all(&line.text)
                    .map_err(|e| FilterError::io(output, e))?;
                stats.emitted += 1;
            } else {
                pending.push(line);
            }
        }

        if !self.sampling.is_streaming() {
            let matched = pending.len();
            let selected = self.sampling.select(pending);
            stats.sampled_out = matched - selected.len();
            for line in &selected {
                writer
                    .write_all(&line.text)
                    .map_err(|e| FilterError::io(output, e))?;
            }
            stats.emitted = selected.len();
        }

        Ok(stats)
    }
}

fn validate_jobs(jobs: &[FilterJob]) -> Result<()> {
    for job in jobs {
        if !job.manifest.exists() {
            return Err(FilterError::MissingFile {
                path: job.manifest.clone(),
            });
        }
        if same_file(&job.manifest, &job.output) {
            return Err(FilterError::OutputIsInput {
                path: job.output.clone(),
            });
        }
    }

    let mut outputs = HashSet::new();
    for job in jobs {
        if !outputs.insert(normalize(&job.output)) {
            return Err(FilterError::DuplicateOutput {
                path: job.output.clone(),
            });
        }
    }
    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    a == b || normalize(a) == normalize(b)
}

/// Canonical form of a path that may not exist yet: the parent directory is
/// resolved when the file itself is missing.
fn normalize(path: &Path) -> PathBuf {
    if let Ok(canonical) = fs::canonicalize(path) {
        return canonical;
    }
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    match (fs::canonicalize(parent), path.file_name()) {
        (Ok(parent), Some(name)) => parent.join(name),
        _ => path.to_path_buf(),
    }
}

/// Builds the index from `vector_file` and runs all jobs.
pub fn filter_lists(
    vector_file: &Path,
    jobs: &[FilterJob],
    state: &State,
) -> Result<Vec<FilterStats>> {
    if !vector_file.exists() {
        return Err(FilterError::MissingFile {
            path: vector_file.to_path_buf(),
        });
    }
    VectorListFilter::open(vector_file, state)?.run(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampling::SegmentDedup;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn filter_str(
        keys: &[&str],
        manifest: &str,
        state: &State,
    ) -> Result<(String, FilterStats)> {
        let index = VectorStoreIndex::from_keys(keys.iter().copied());
        let filter = VectorListFilter::new(index, state);
        let reader = ManifestReader::new(
            Cursor::new(manifest.to_string()),
            Path::new("utt2spk"),
            state.line_policy,
        );
        let mut out = Vec::new();
        let stats = filter.filter_to_writer(reader, &mut out, Path::new("out"))?;
        Ok((String::from_utf8(out).unwrap(), stats))
    }

    #[test]
    fn keeps_only_indexed_keys_in_order() {
        let (out, stats) = filter_str(
            &["a", "b", "c"],
            "a spk1\nx spk2\nb spk1\n",
            &State::default(),
        )
        .unwrap();
        assert_eq!(out, "a spk1\nb spk1\n");
        assert_eq!(stats.lines_read, 3);
        assert_eq!(stats.emitted, 2);
        assert_eq!(stats.dropped, 1);
    }

    #[test]
    fn empty_index_drops_everything() {
        let (out, stats) = filter_str(&[], "a spk1\nb spk2\n", &State::default()).unwrap();
        assert!(out.is_empty());
        assert_eq!(stats.dropped, 2);
    }

    #[test]
    fn full_coverage_is_byte_identical() {
        let manifest = "a  spk1\r\nb\tspk1 extra\nc spk2";
        let (out, _) = filter_str(&["a", "b", "c"], manifest, &State::default()).unwrap();
        assert_eq!(out, manifest);
    }

    #[test]
    fn filtering_is_idempotent() {
        let keys = ["a", "c", "e"];
        let manifest = "a s1\nb s1\nc s2\n\nd s2\ne\n";
        let (once, _) = filter_str(&keys, manifest, &State::default()).unwrap();
        let (twice, _) = filter_str(&keys, &once, &State::default()).unwrap();
        assert_eq!(once, "a s1\nc s2\ne \n");
        assert_eq!(once, twice);
    }

    #[test]
    fn strict_policy_fails_on_missing_label() {
        let state = State {
            line_policy: LinePolicy::Strict,
            ..State::default()
        };
        let err = filter_str(&["a"], "a spk1\nb\n", &state).unwrap_err();
        assert!(matches!(err, FilterError::MalformedLine { line_number: 2, .. }));
    }

    #[test]
    fn random_sampling_is_a_subsequence_of_the_filtered_list() {
        let state = State {
            sampling: SamplingStrategy::Random {
                sample_size: 2,
                seed: 11,
                dedup: Some(SegmentDedup { delimiter: '-' }),
            },
            ..State::default()
        };
        let keys = ["s1-a-1", "s1-a-2", "s2-b-1", "s3-c-1"];
        let manifest = "s1-a-1 s1\ns1-a-2 s1\nzz-1 s9\ns2-b-1 s2\ns3-c-1 s3\n";
        let (out, stats) = filter_str(&keys, manifest, &state).unwrap();

        let (full, _) = filter_str(&keys, manifest, &State::default()).unwrap();
        let full: Vec<&str> = full.lines().collect();
        let picked: Vec<&str> = out.lines().collect();
        assert_eq!(picked.len(), 2);
        assert_eq!(stats.emitted, 2);
        assert_eq!(stats.sampled_out, 2);
        assert_eq!(stats.dropped, 1);

        let mut cursor = full.iter();
        assert!(picked.iter().all(|line| cursor.any(|l| l == line)));
        assert!(!(picked.contains(&"s1-a-1 s1") && picked.contains(&"s1-a-2 s1")));
    }

    #[test]
    fn run_writes_every_output_and_creates_dirs() {
        let dir = tempdir().unwrap();
        let train = dir.path().join("train_utt2spk");
        let adapt = dir.path().join("adapt_utt2spk");
        fs::write(&train, "a s1\nb s2\nc s3\n").unwrap();
        fs::write(&adapt, "d s4\na s1\n").unwrap();

        let state = State {
            create_dirs: true,
            ..State::default()
        };
        let filter = VectorListFilter::new(VectorStoreIndex::from_keys(["a", "c", "d"]), &state);
        let jobs = vec![
            FilterJob::new(&train, dir.path().join("plda/train/utt2spk")),
            FilterJob::new(&adapt, dir.path().join("plda/adapt/utt2spk")),
        ];
        let stats = filter.run(&jobs).unwrap();

        assert_eq!(stats.len(), 2);
        assert_eq!(
            fs::read_to_string(dir.path().join("plda/train/utt2spk")).unwrap(),
            "a s1\nc s3\n"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("plda/adapt/utt2spk")).unwrap(),
            "d s4\na s1\n"
        );
        assert_eq!(stats[1].manifest, adapt);
    }

    #[test]
    fn run_checks_inputs_before_writing() {
        let dir = tempdir().unwrap();
        let present = dir.path().join("utt2spk");
        fs::write(&present, "a s1\n").unwrap();
        let missing = dir.path().join("missing_utt2spk");
        let first_out = dir.path().join("out1");

        let filter = VectorListFilter::new(VectorStoreIndex::from_keys(["a"]), &State::default());
        let jobs = vec![
            FilterJob::new(&present, &first_out),
            FilterJob::new(&missing, dir.path().join("out2")),
        ];
        match filter.run(&jobs) {
            Err(FilterError::MissingFile { path }) => assert_eq!(path, missing),
            other => panic!("expected MissingFile, got {:?}", other),
        }
        assert!(!first_out.exists());
    }

    #[test]
    fn run_rejects_shared_outputs_and_in_place_writes() {
        let dir = tempdir().unwrap();
        let m1 = dir.path().join("m1");
        let m2 = dir.path().join("m2");
        fs::write(&m1, "a s1\n").unwrap();
        fs::write(&m2, "a s1\n").unwrap();
        let out = dir.path().join("out");

        let filter = VectorListFilter::new(VectorStoreIndex::from_keys(["a"]), &State::default());
        let shared = vec![FilterJob::new(&m1, &out), FilterJob::new(&m2, &out)];
        assert!(matches!(
            filter.run(&shared),
            Err(FilterError::DuplicateOutput { .. })
        ));

        let in_place = vec![FilterJob::new(&m1, &m1)];
        assert!(matches!(
            filter.run(&in_place),
            Err(FilterError::OutputIsInput { .. })
        ));
    }

    #[test]
    fn filter_lists_reports_missing_vector_file() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("utt2spk");
        fs::write(&manifest, "a s1\n").unwrap();
        let vector_file = dir.path().join("xvector.scp");

        let err = filter_lists(
            &vector_file,
            &[FilterJob::new(&manifest, dir.path().join("out"))],
            &State::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("xvector.scp"));
    }

    #[test]
    fn sequential_run_writes_every_output() {
        let dir = tempdir().unwrap();
        let train = dir.path().join("train_utt2spk");
        let adapt = dir.path().join("adapt_utt2spk");
        fs::write(&train, "a s1\nb s2\nc s3\n").unwrap();
        fs::write(&adapt, "d s4\na s1\n").unwrap();

        let state = State {
            parallel: false,
            ..State::default()
        };
        let filter = VectorListFilter::new(VectorStoreIndex::from_keys(["a", "c", "d"]), &state);
        let jobs = vec![
            FilterJob::new(&train, dir.path().join("train_out")),
            FilterJob::new(&adapt, dir.path().join("adapt_out")),
        ];
        let stats = filter.run(&jobs).unwrap();

        assert_eq!(stats[0].manifest, train);
        assert_eq!(stats[1].manifest, adapt);
        assert_eq!(
            fs::read_to_string(dir.path().join("train_out")).unwrap(),
            "a s1\nc s3\n"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("adapt_out")).unwrap(),
            "d s4\na s1\n"
        );
    }

    #[test]
    fn run_rejects_two_spellings_of_one_new_output() {
        let dir = tempdir().unwrap();
        let m1 = dir.path().join("m1");
        let m2 = dir.path().join("m2");
        fs::write(&m1, "a s1\n").unwrap();
        fs::write(&m2, "b s2\n").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let filter = VectorListFilter::new(VectorStoreIndex::from_keys(["a", "b"]), &State::default());
        let jobs = vec![
            FilterJob::new(&m1, dir.path().join("out")),
            FilterJob::new(&m2, dir.path().join("sub/../out")),
        ];
        assert!(matches!(
            filter.run(&jobs),
            Err(FilterError::DuplicateOutput { .. })
        ));
        assert!(!dir.path().join("out").exists());
    }

    #[cfg(unix)]
    #[test]
    fn run_rejects_new_output_reached_through_symlink() {
        let dir = tempdir().unwrap();
        let m1 = dir.path().join("m1");
        let m2 = dir.path().join("m2");
        fs::write(&m1, "a s1\n").unwrap();
        fs::write(&m2, "b s2\n").unwrap();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("link")).unwrap();

        let filter = VectorListFilter::new(VectorStoreIndex::from_keys(["a", "b"]), &State::default());
        let jobs = vec![
            FilterJob::new(&m1, dir.path().join("out")),
            FilterJob::new(&m2, dir.path().join("link/out")),
        ];
        assert!(matches!(
            filter.run(&jobs),
            Err(FilterError::DuplicateOutput { .. })
        ));
    }

    #[test]
    fn filter_lists_reports_missing_manifest() {
        let dir = tempdir().unwrap();
        let vector_file = dir.path().join("xvector.scp");
        fs::write(&vector_file, "a 1\n").unwrap();
        let missing = dir.path().join("utt2spk");

        match filter_lists(
            &vector_file,
            &[FilterJob::new(&missing, dir.path().join("out"))],
            &State::default(),
        ) {
            Err(FilterError::MissingFile { path }) => assert_eq!(path, missing),
            other => panic!("expected MissingFile, got {:?}", other),
        }
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn non_utf8_labels_are_written_byte_for_byte() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("utt2spk");
        let out = dir.path().join("out");
        fs::write(&manifest, b"a Jos\xe9\nx Ren\xe9e\nb s2\n").unwrap();

        let filter = VectorListFilter::new(VectorStoreIndex::from_keys(["a", "b"]), &State::default());
        filter.run(&[FilterJob::new(&manifest, &out)]).unwrap();

        assert_eq!(fs::read(&out).unwrap(), b"a Jos\xe9\nb s2\n");
    }

    #[test]
    fn index_and_manifest_split_keys_the_same_way() {
        let dir = tempdir().unwrap();
        let vector_file = dir.path().join("xvector.scp");
        let manifest = dir.path().join("utt2spk");
        let out = dir.path().join("out");
        fs::write(&vector_file, "utt\u{a0}1 ark:x.ark:1\n").unwrap();
        fs::write(&manifest, "utt\u{a0}1 spk1\nutt spk2\n").unwrap();

        filter_lists(&vector_file, &[FilterJob::new(&manifest, &out)], &State::default()).unwrap();

        assert_eq!(fs::read_to_string(&out).unwrap(), "utt\u{a0}1 spk1\n");
    }
}
