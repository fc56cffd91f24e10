//! Dataset Test Builder
//!
//! Writes small BIDS-like datasets into a temporary directory

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};

pub const PARTICIPANTS_HEADER: &str = "participant_id\tsex\tsite\tproject\tcohort";

/// Write a file, creating its parent directories
pub fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

pub struct DatasetBuilder {
    pub root: PathBuf,
}

impl DatasetBuilder {
    /// Start a dataset with its dataset_description.json
    pub fn new(root: &Path, name: &str) -> Result<Self> {
        let description = format!(
            "{{\"Name\": \"{}\", \"BIDSVersion\": \"1.8.0\", \"DatasetType\": \"raw\"}}",
            name
        );
        write_file(&root.join("dataset_description.json"), &description)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// participants.tsv with [`PARTICIPANTS_HEADER`] and the given rows
    pub fn participants(&self, rows: &[&str]) -> Result<&Self> {
        let mut content = format!("{}\n", PARTICIPANTS_HEADER);
        for row in rows {
            content.push_str(row);
            content.push('\n');
        }
        write_file(&self.root.join("participants.tsv"), &content)?;
        Ok(self)
    }

    fn visit_dir(&self, subject: &str, session: Option<&str>) -> PathBuf {
        let subject_dir = self.root.join(format!("sub-{}", subject));
        match session {
            Some(session) => subject_dir.join(format!("ses-{}", session)),
            None => subject_dir,
        }
    }

    fn entity_prefix(subject: &str, session: Option<&str>) -> String {
        match session {
            Some(session) => format!("sub-{}_ses-{}", subject, session),
            None => format!("sub-{}", subject),
        }
    }

    /// A T1w image with its JSON sidecar; returns the image path
    pub fn anat(&self, subject: &str, session: Option<&str>) -> Result<PathBuf> {
        let dir = self.visit_dir(subject, session).join("anat");
        let prefix = Self::entity_prefix(subject, session);

        let image = dir.join(format!("{}_T1w.nii.gz", prefix));
        write_file(&image, "nifti image")?;
        write_file(
            &dir.join(format!("{}_T1w.json", prefix)),
            "{\"MagneticFieldStrength\": 3, \"RepetitionTime\": 2.3}",
        )?;
        Ok(image)
    }

    /// A CTF recording with sidecar, channels, events, events dictionary and
    /// a scans.tsv listing it; returns the recording directory
    pub fn meg(&self, subject: &str, session: Option<&str>) -> Result<PathBuf> {
        let visit_dir = self.visit_dir(subject, session);
        let dir = visit_dir.join("meg");
        let prefix = format!("{}_task-rest", Self::entity_prefix(subject, session));

        let recording = dir.join(format!("{}_meg.ds", prefix));
        write_file(&recording.join(format!("{}_meg.meg4", prefix)), "meg samples")?;
        write_file(&recording.join(format!("{}_meg.res4", prefix)), "meg resources")?;

        write_file(
            &dir.join(format!("{}_meg.json", prefix)),
            "{\"TaskName\": \"rest\", \"SamplingFrequency\": 1200, \"PowerLineFrequency\": 60}",
        )?;
        write_file(
            &dir.join(format!("{}_channels.tsv", prefix)),
            "name\ttype\tunits\tsampling_frequency\tlow_cutoff\thigh_cutoff\tnotch\tstatus\n\
             MLC11\tMEGGRADAXIAL\tT\t1200\t0\t300\tn/a\tgood\n\
             UPPT001\tTRIG\tV\t1200\tn/a\tn/a\tn/a\tgood\n",
        )?;
        write_file(
            &dir.join(format!("{}_events.tsv", prefix)),
            "onset\tduration\ttrial_type\tresponse_time\tchannel\tHED\tstim_file\n\
             1.0\t0.5\tgo\t0.42\tUPPT001\tSensory-event,(Visual-presentation,Face)\tface1.png\n\
             2.5\t0.5\tstop\tn/a\tn/a\tn/a\tn/a\n",
        )?;
        write_file(
            &dir.join(format!("{}_events.json", prefix)),
            r#"{
                "trial_type": {
                    "Description": "Kind of trial",
                    "Levels": {"go": "Go trial", "stop": "Stop trial"},
                    "HED": {"go": "Agent-action,(Press)", "stop": "Sensory-event"}
                }
            }"#,
        )?;

        let scans = visit_dir.join(format!("{}_scans.tsv", Self::entity_prefix(subject, session)));
        write_file(
            &scans,
            &format!(
                "filename\tacq_time\nmeg/{}_meg.ds\t2024-03-01T10:00:00\n",
                prefix
            ),
        )?;

        Ok(recording)
    }

    /// Dataset-level events.json with one HED annotation
    pub fn root_events(&self) -> Result<&Self> {
        write_file(
            &self.root.join("events.json"),
            r#"{"trial_type": {"HED": {"go": "Press"}}}"#,
        )?;
        Ok(self)
    }
}
