//! Job status and typed job payloads.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::language;
use crate::pipeline::catalog::JobType;

/// Lifecycle of a dispatched job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
    /// Superseded by an operator reset or project cancellation.
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Queued or running jobs count against the de-duplication rule.
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(ValidationError::UnknownStatus(other.to_string())),
        }
    }
}

/// Script generation covers every language in one job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptJobPayload {
    #[serde(default)]
    pub languages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioJobPayload {
    pub language_code: String,
    /// Voice candidate chosen for synthesis, if one was picked upstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_candidate_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageJobPayload {
    pub language_code: String,
}

/// Project-wide work with no per-job parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectJobPayload {}

/// Work description handed to a daemon, one variant per job type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    Script(ScriptJobPayload),
    Audio(AudioJobPayload),
    Transcription(LanguageJobPayload),
    Metadata(ProjectJobPayload),
    Captions(LanguageJobPayload),
    Images(ProjectJobPayload),
    VideoParts(LanguageJobPayload),
    VideoMain(LanguageJobPayload),
}

impl JobPayload {
    /// Builds the default payload for one unit of `job_type` work.
    ///
    /// Per-language job types need `language_code`; project-wide ones ignore it
    /// (script jobs receive the full language list instead).
    pub fn for_job_type(
        job_type: JobType,
        language_code: Option<&str>,
        project_languages: &[String],
    ) -> Result<Self, ValidationError> {
        let lang = || {
            language_code
                .map(language::normalize)
                .ok_or(ValidationError::LanguageRequired { job_type })
        };
        let payload = match job_type {
            JobType::Script => JobPayload::Script(ScriptJobPayload {
                languages: project_languages.to_vec(),
            }),
            JobType::Audio => JobPayload::Audio(AudioJobPayload {
                language_code: lang()?,
                audio_candidate_id: None,
            }),
            JobType::Transcription => JobPayload::Transcription(LanguageJobPayload {
                language_code: lang()?,
            }),
            JobType::Metadata => JobPayload::Metadata(ProjectJobPayload::default()),
            JobType::Captions => JobPayload::Captions(LanguageJobPayload {
                language_code: lang()?,
            }),
            JobType::Images => JobPayload::Images(ProjectJobPayload::default()),
            JobType::VideoParts => JobPayload::VideoParts(LanguageJobPayload {
                language_code: lang()?,
            }),
            JobType::VideoMain => JobPayload::VideoMain(LanguageJobPayload {
                language_code: lang()?,
            }),
        };
        Ok(payload)
    }

    pub fn job_type(&self) -> JobType {
        match self {
            JobPayload::Script(_) => JobType::Script,
            JobPayload::Audio(_) => JobType::Audio,
            JobPayload::Transcription(_) => JobType::Transcription,
            JobPayload::Metadata(_) => JobType::Metadata,
            JobPayload::Captions(_) => JobType::Captions,
            JobPayload::Images(_) => JobType::Images,
            JobPayload::VideoParts(_) => JobType::VideoParts,
            JobPayload::VideoMain(_) => JobType::VideoMain,
        }
    }

    /// Language this job is scoped to, as given.
    pub fn language_code(&self) -> Option<&str> {
        match self {
            JobPayload::Audio(p) => Some(&p.language_code),
            JobPayload::Transcription(p)
            | JobPayload::Captions(p)
            | JobPayload::VideoParts(p)
            | JobPayload::VideoMain(p) => Some(&p.language_code),
            JobPayload::Script(_) | JobPayload::Metadata(_) | JobPayload::Images(_) => None,
        }
    }

    /// De-duplication key: the normalized language, or `""` for project-wide jobs.
    pub fn language_key(&self) -> String {
        self.language_code()
            .map(language::normalize)
            .unwrap_or_default()
    }

    /// Returns the payload with every language code normalized.
    pub fn normalized(mut self) -> Self {
        match &mut self {
            JobPayload::Script(p) => {
                for code in &mut p.languages {
                    *code = language::normalize(code);
                }
            }
            JobPayload::Audio(p) => p.language_code = language::normalize(&p.language_code),
            JobPayload::Transcription(p)
            | JobPayload::Captions(p)
            | JobPayload::VideoParts(p)
            | JobPayload::VideoMain(p) => p.language_code = language::normalize(&p.language_code),
            JobPayload::Metadata(_) | JobPayload::Images(_) => {}
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_json_is_tagged_by_job_type() {
        let payload = JobPayload::Audio(AudioJobPayload {
            language_code: "en".to_string(),
            audio_candidate_id: Some("cand-7".to_string()),
        });
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "audio");
        assert_eq!(json["language_code"], "en");
        assert_eq!(json["audio_candidate_id"], "cand-7");

        let images: JobPayload = serde_json::from_str(r#"{"type":"images"}"#).unwrap();
        assert_eq!(images.job_type(), JobType::Images);
    }

    #[test]
    fn test_language_key_is_normalized() {
        let payload = JobPayload::VideoParts(LanguageJobPayload {
            language_code: "  ES ".to_string(),
        });
        assert_eq!(payload.language_key(), "es");
        assert_eq!(JobPayload::Images(ProjectJobPayload {}).language_key(), "");
    }

    #[test]
    fn test_for_job_type_requires_language_for_fan_out_types() {
        let err = JobPayload::for_job_type(JobType::Captions, None, &[]).unwrap_err();
        assert_eq!(
            err,
            ValidationError::LanguageRequired {
                job_type: JobType::Captions
            }
        );

        let langs = vec!["en".to_string(), "es".to_string()];
        let script = JobPayload::for_job_type(JobType::Script, Some("en"), &langs).unwrap();
        assert_eq!(script.language_code(), None);
        assert_eq!(
            script,
            JobPayload::Script(ScriptJobPayload { languages: langs })
        );
    }

    #[test]
    fn test_job_status_active() {
        assert!(JobStatus::Queued.is_active());
        assert!(JobStatus::Running.is_active());
        assert!(!JobStatus::Cancelled.is_active());
        assert_eq!("failed".parse::<JobStatus>().unwrap(), JobStatus::Failed);
    }
}
