//! Status catalog: the single table describing the production pipeline.
//!
//! Every question of the form "what job does this status need", "what comes
//! after this status" or "is this status terminal" is answered here.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Status of a project in the production pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    New,
    ProcessScript,
    ProcessScriptValidate,
    ProcessAudio,
    ProcessAudioValidate,
    ProcessTranscription,
    ProcessMetadata,
    ProcessCaptionsVideo,
    ProcessImagesGeneration,
    ProcessVideoPartsGeneration,
    ProcessVideoMain,
    Done,
    Error,
    Cancelled,
}

/// Kind of work a daemon executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Script,
    Audio,
    Transcription,
    Metadata,
    Captions,
    Images,
    VideoParts,
    VideoMain,
}

/// Per-language completion flag tracked in `language_progress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Audio,
    Transcription,
    Captions,
    VideoParts,
    FinalVideo,
}

/// One row of the catalog.
#[derive(Debug, Clone, Copy)]
pub struct StatusEntry {
    pub status: ProjectStatus,
    /// Work a daemon must finish to move out of this status.
    pub job_type: Option<JobType>,
    /// Per-language flag that gates leaving this status.
    pub stage: Option<ProgressStage>,
    /// Natural successor; `None` for terminal statuses.
    pub next: Option<ProjectStatus>,
}

const fn entry(
    status: ProjectStatus,
    job_type: Option<JobType>,
    stage: Option<ProgressStage>,
    next: Option<ProjectStatus>,
) -> StatusEntry {
    StatusEntry {
        status,
        job_type,
        stage,
        next,
    }
}

use JobType as J;
use ProgressStage as S;
use ProjectStatus as P;

/// The linear pipeline in order, followed by the two off-pipeline terminals.
const CATALOG: &[StatusEntry] = &[
    entry(P::New, None, None, Some(P::ProcessScript)),
    entry(P::ProcessScript, Some(J::Script), None, Some(P::ProcessScriptValidate)),
    entry(P::ProcessScriptValidate, None, None, Some(P::ProcessAudio)),
    entry(P::ProcessAudio, Some(J::Audio), Some(S::Audio), Some(P::ProcessAudioValidate)),
    entry(P::ProcessAudioValidate, None, None, Some(P::ProcessTranscription)),
    entry(
        P::ProcessTranscription,
        Some(J::Transcription),
        Some(S::Transcription),
        Some(P::ProcessMetadata),
    ),
    entry(P::ProcessMetadata, Some(J::Metadata), None, Some(P::ProcessCaptionsVideo)),
    entry(
        P::ProcessCaptionsVideo,
        Some(J::Captions),
        Some(S::Captions),
        Some(P::ProcessImagesGeneration),
    ),
    entry(
        P::ProcessImagesGeneration,
        Some(J::Images),
        None,
        Some(P::ProcessVideoPartsGeneration),
    ),
    entry(
        P::ProcessVideoPartsGeneration,
        Some(J::VideoParts),
        Some(S::VideoParts),
        Some(P::ProcessVideoMain),
    ),
    entry(P::ProcessVideoMain, Some(J::VideoMain), Some(S::FinalVideo), Some(P::Done)),
    entry(P::Done, None, None, None),
    entry(P::Error, None, None, None),
    entry(P::Cancelled, None, None, None),
];

/// Number of entries that form the linear pipeline (`New` through `Done`).
const PIPELINE_LEN: usize = 12;

/// Static lookups over the catalog table.
pub struct StatusCatalog;

impl StatusCatalog {
    /// The catalog row for `status`.
    pub fn entry(status: ProjectStatus) -> &'static StatusEntry {
        // The table lists every variant exactly once, in declaration order.
        &CATALOG[status as usize]
    }

    /// Job type a daemon must execute to advance out of `status`.
    pub fn job_type_for_status(status: ProjectStatus) -> Option<JobType> {
        Self::entry(status).job_type
    }

    /// Natural successor of `status`.
    pub fn next_status(status: ProjectStatus) -> Option<ProjectStatus> {
        Self::entry(status).next
    }

    /// Statuses of the linear pipeline, `New` through `Done`.
    pub fn pipeline() -> impl Iterator<Item = ProjectStatus> {
        CATALOG[..PIPELINE_LEN].iter().map(|e| e.status)
    }

    /// Every status, including the off-pipeline terminals.
    pub fn all() -> impl Iterator<Item = ProjectStatus> {
        CATALOG.iter().map(|e| e.status)
    }

    /// Job types run at or after `status` in pipeline order.
    ///
    /// Off-pipeline statuses have no position, so nothing is downstream.
    pub fn job_types_from(status: ProjectStatus) -> Vec<JobType> {
        match status.position() {
            Some(pos) => CATALOG[pos..PIPELINE_LEN]
                .iter()
                .filter_map(|e| e.job_type)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Progress flags owned by statuses at or after `status` in pipeline order.
    pub fn stages_from(status: ProjectStatus) -> Vec<ProgressStage> {
        match status.position() {
            Some(pos) => CATALOG[pos..PIPELINE_LEN]
                .iter()
                .filter_map(|e| e.stage)
                .collect(),
            None => Vec::new(),
        }
    }
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            P::New => "new",
            P::ProcessScript => "process_script",
            P::ProcessScriptValidate => "process_script_validate",
            P::ProcessAudio => "process_audio",
            P::ProcessAudioValidate => "process_audio_validate",
            P::ProcessTranscription => "process_transcription",
            P::ProcessMetadata => "process_metadata",
            P::ProcessCaptionsVideo => "process_captions_video",
            P::ProcessImagesGeneration => "process_images_generation",
            P::ProcessVideoPartsGeneration => "process_video_parts_generation",
            P::ProcessVideoMain => "process_video_main",
            P::Done => "done",
            P::Error => "error",
            P::Cancelled => "cancelled",
        }
    }

    /// Position in the linear pipeline; `None` for `Error` and `Cancelled`.
    pub fn position(self) -> Option<usize> {
        let idx = self as usize;
        (idx < PIPELINE_LEN).then_some(idx)
    }

    pub fn is_terminal(self) -> bool {
        StatusCatalog::entry(self).next.is_none()
    }

    /// Waiting on a human or automatic approval rather than a daemon.
    pub fn is_approval_gate(self) -> bool {
        matches!(self, P::ProcessScriptValidate | P::ProcessAudioValidate)
    }

    pub fn job_type(self) -> Option<JobType> {
        StatusCatalog::job_type_for_status(self)
    }

    pub fn progress_stage(self) -> Option<ProgressStage> {
        StatusCatalog::entry(self).stage
    }

    pub fn next(self) -> Option<ProjectStatus> {
        StatusCatalog::next_status(self)
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StatusCatalog::all()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownStatus(s.to_string()))
    }
}

impl JobType {
    pub const ALL: [JobType; 8] = [
        J::Script,
        J::Audio,
        J::Transcription,
        J::Metadata,
        J::Captions,
        J::Images,
        J::VideoParts,
        J::VideoMain,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            J::Script => "script",
            J::Audio => "audio",
            J::Transcription => "transcription",
            J::Metadata => "metadata",
            J::Captions => "captions",
            J::Images => "images",
            J::VideoParts => "video_parts",
            J::VideoMain => "video_main",
        }
    }

    /// Status whose exit this job type unlocks.
    pub fn status(self) -> ProjectStatus {
        CATALOG
            .iter()
            .find(|e| e.job_type == Some(self))
            .map(|e| e.status)
            .unwrap_or(P::New)
    }

    /// Per-language job types fan out to one job per active language.
    pub fn progress_stage(self) -> Option<ProgressStage> {
        self.status().progress_stage()
    }

    pub fn is_per_language(self) -> bool {
        self.progress_stage().is_some()
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownJobType(s.to_string()))
    }
}

impl ProgressStage {
    pub const ALL: [ProgressStage; 5] = [
        S::Audio,
        S::Transcription,
        S::Captions,
        S::VideoParts,
        S::FinalVideo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            S::Audio => "audio",
            S::Transcription => "transcription",
            S::Captions => "captions",
            S::VideoParts => "video_parts",
            S::FinalVideo => "final_video",
        }
    }

    /// Column holding this flag in `language_progress`.
    pub fn column(&self) -> &'static str {
        match self {
            S::Audio => "audio_done",
            S::Transcription => "transcription_done",
            S::Captions => "captions_done",
            S::VideoParts => "video_parts_done",
            S::FinalVideo => "final_video_done",
        }
    }

    /// Status this flag gates.
    pub fn status(self) -> ProjectStatus {
        CATALOG
            .iter()
            .find(|e| e.stage == Some(self))
            .map(|e| e.status)
            .unwrap_or(P::New)
    }
}

impl fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_rows_match_variant_order() {
        for (idx, entry) in CATALOG.iter().enumerate() {
            assert_eq!(entry.status as usize, idx, "row {} out of order", idx);
        }
        assert_eq!(CATALOG.len(), 14);
    }

    #[test]
    fn test_pipeline_is_linear_chain() {
        let pipeline: Vec<_> = StatusCatalog::pipeline().collect();
        assert_eq!(pipeline.first(), Some(&P::New));
        assert_eq!(pipeline.last(), Some(&P::Done));
        for pair in pipeline.windows(2) {
            assert_eq!(pair[0].next(), Some(pair[1]));
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(P::Done.is_terminal());
        assert!(P::Error.is_terminal());
        assert!(P::Cancelled.is_terminal());
        assert!(!P::New.is_terminal());
        assert!(!P::ProcessVideoMain.is_terminal());
    }

    #[test]
    fn test_job_type_for_status() {
        assert_eq!(StatusCatalog::job_type_for_status(P::ProcessScript), Some(J::Script));
        assert_eq!(StatusCatalog::job_type_for_status(P::ProcessAudio), Some(J::Audio));
        assert_eq!(
            StatusCatalog::job_type_for_status(P::ProcessVideoPartsGeneration),
            Some(J::VideoParts)
        );
        assert_eq!(StatusCatalog::job_type_for_status(P::ProcessScriptValidate), None);
        assert_eq!(StatusCatalog::job_type_for_status(P::ProcessAudioValidate), None);
        assert_eq!(StatusCatalog::job_type_for_status(P::New), None);
        assert_eq!(StatusCatalog::job_type_for_status(P::Done), None);
        assert_eq!(StatusCatalog::job_type_for_status(P::Cancelled), None);
    }

    #[test]
    fn test_job_type_round_trips_to_status() {
        for job_type in JobType::ALL {
            assert_eq!(job_type.status().job_type(), Some(job_type));
        }
    }

    #[test]
    fn test_per_language_job_types() {
        assert!(J::Audio.is_per_language());
        assert!(J::VideoMain.is_per_language());
        assert!(!J::Script.is_per_language());
        assert!(!J::Metadata.is_per_language());
        assert!(!J::Images.is_per_language());
        assert_eq!(J::VideoMain.progress_stage(), Some(S::FinalVideo));
    }

    #[test]
    fn test_downstream_sets() {
        assert_eq!(
            StatusCatalog::job_types_from(P::ProcessImagesGeneration),
            vec![J::Images, J::VideoParts, J::VideoMain]
        );
        assert_eq!(
            StatusCatalog::stages_from(P::ProcessImagesGeneration),
            vec![S::VideoParts, S::FinalVideo]
        );
        assert_eq!(StatusCatalog::stages_from(P::New), ProgressStage::ALL.to_vec());
        assert!(StatusCatalog::job_types_from(P::Done).is_empty());
        assert!(StatusCatalog::job_types_from(P::Error).is_empty());
    }

    #[test]
    fn test_status_parse_round_trip() {
        for status in StatusCatalog::all() {
            assert_eq!(status.as_str().parse::<ProjectStatus>().unwrap(), status);
        }
        assert!("process_everything".parse::<ProjectStatus>().is_err());
        assert!("rendering".parse::<JobType>().is_err());
    }

    #[test]
    fn test_serde_matches_storage_names() {
        let json = serde_json::to_string(&P::ProcessVideoPartsGeneration).unwrap();
        assert_eq!(json, "\"process_video_parts_generation\"");
        let json = serde_json::to_string(&J::VideoMain).unwrap();
        assert_eq!(json, "\"video_main\"");
    }
}
