//! Notification gating: only surface a milestone once every active language
//! has reached it.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::pipeline::catalog::ProjectStatus;

/// Per-language evidence that a milestone was reached, one variant per
/// milestone status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "milestone", content = "languages", rename_all = "snake_case")]
pub enum Milestone {
    ScriptsProduced(BTreeSet<String>),
    AudioTranslated(BTreeSet<String>),
    TranscriptionComplete(BTreeSet<String>),
    CaptionsRendered(BTreeSet<String>),
    VideoPartsRendered(BTreeSet<String>),
    FinalVideoRendered(BTreeSet<String>),
}

impl Milestone {
    /// The status whose completion this milestone reports.
    pub fn status(&self) -> ProjectStatus {
        match self {
            Milestone::ScriptsProduced(_) => ProjectStatus::ProcessScript,
            Milestone::AudioTranslated(_) => ProjectStatus::ProcessAudio,
            Milestone::TranscriptionComplete(_) => ProjectStatus::ProcessTranscription,
            Milestone::CaptionsRendered(_) => ProjectStatus::ProcessCaptionsVideo,
            Milestone::VideoPartsRendered(_) => ProjectStatus::ProcessVideoPartsGeneration,
            Milestone::FinalVideoRendered(_) => ProjectStatus::ProcessVideoMain,
        }
    }

    pub fn languages(&self) -> &BTreeSet<String> {
        match self {
            Milestone::ScriptsProduced(l)
            | Milestone::AudioTranslated(l)
            | Milestone::TranscriptionComplete(l)
            | Milestone::CaptionsRendered(l)
            | Milestone::VideoPartsRendered(l)
            | Milestone::FinalVideoRendered(l) => l,
        }
    }

    /// Builds the milestone for `status` from a set of languages.
    pub fn for_status(status: ProjectStatus, languages: BTreeSet<String>) -> Option<Self> {
        let milestone = match status {
            ProjectStatus::ProcessScript => Milestone::ScriptsProduced(languages),
            ProjectStatus::ProcessAudio => Milestone::AudioTranslated(languages),
            ProjectStatus::ProcessTranscription => Milestone::TranscriptionComplete(languages),
            ProjectStatus::ProcessCaptionsVideo => Milestone::CaptionsRendered(languages),
            ProjectStatus::ProcessVideoPartsGeneration => Milestone::VideoPartsRendered(languages),
            ProjectStatus::ProcessVideoMain => Milestone::FinalVideoRendered(languages),
            _ => return None,
        };
        Some(milestone)
    }
}

pub struct NotificationGate;

impl NotificationGate {
    /// Whether `status` has a per-language milestone to wait for.
    pub fn is_milestone(status: ProjectStatus) -> bool {
        Milestone::for_status(status, BTreeSet::new()).is_some()
    }

    /// Decides whether completing `status` should be surfaced.
    ///
    /// Non-milestone statuses always notify, as does a project with no active
    /// languages. Otherwise the milestone must match `status` and list every
    /// active language.
    pub fn should_notify(
        status: ProjectStatus,
        milestone: Option<&Milestone>,
        active_languages: &[String],
    ) -> bool {
        if !Self::is_milestone(status) || active_languages.is_empty() {
            return true;
        }
        match milestone {
            Some(m) if m.status() == status => active_languages
                .iter()
                .all(|code| m.languages().contains(code)),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(codes: &[&str]) -> BTreeSet<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    fn langs(codes: &[&str]) -> Vec<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_waits_for_every_active_language() {
        let partial = Milestone::FinalVideoRendered(set(&["en"]));
        assert!(!NotificationGate::should_notify(
            ProjectStatus::ProcessVideoMain,
            Some(&partial),
            &langs(&["en", "es"]),
        ));

        let full = Milestone::FinalVideoRendered(set(&["en", "es", "fr"]));
        assert!(NotificationGate::should_notify(
            ProjectStatus::ProcessVideoMain,
            Some(&full),
            &langs(&["en", "es"]),
        ));
    }

    #[test]
    fn test_no_active_languages_notifies() {
        assert!(NotificationGate::should_notify(
            ProjectStatus::ProcessAudio,
            None,
            &[],
        ));
    }

    #[test]
    fn test_missing_or_mismatched_milestone() {
        let active = langs(&["en"]);
        assert!(!NotificationGate::should_notify(
            ProjectStatus::ProcessAudio,
            None,
            &active,
        ));
        let wrong = Milestone::ScriptsProduced(set(&["en"]));
        assert!(!NotificationGate::should_notify(
            ProjectStatus::ProcessAudio,
            Some(&wrong),
            &active,
        ));
    }

    #[test]
    fn test_non_milestone_statuses_always_notify() {
        for status in [
            ProjectStatus::New,
            ProjectStatus::ProcessScriptValidate,
            ProjectStatus::ProcessMetadata,
            ProjectStatus::ProcessImagesGeneration,
            ProjectStatus::Done,
        ] {
            assert!(NotificationGate::should_notify(status, None, &langs(&["en"])));
        }
    }

    #[test]
    fn test_milestone_round_trip_through_status() {
        for status in [
            ProjectStatus::ProcessScript,
            ProjectStatus::ProcessAudio,
            ProjectStatus::ProcessTranscription,
            ProjectStatus::ProcessCaptionsVideo,
            ProjectStatus::ProcessVideoPartsGeneration,
            ProjectStatus::ProcessVideoMain,
        ] {
            let m = Milestone::for_status(status, set(&["en"])).unwrap();
            assert_eq!(m.status(), status);
        }
    }
}
