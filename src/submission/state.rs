use serde::Serialize;
use thiserror::Error;

use crate::models::{validate_display_name, DonationRecord, NameError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AttemptId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "camelCase")]
pub enum Outcome {
    Succeeded,
    Failed(String),
    Cancelled,
}

/// How a send task ended, as reported by whoever ran it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptResult {
    /// The request ran to completion; `Err` carries the failure reason.
    Completed(Result<(), String>),
    /// The request was stopped before it completed.
    Stopped,
}

#[derive(Debug, Clone)]
pub struct Attempt {
    pub id: AttemptId,
    /// The record being sent, with the validated sender name applied.
    pub record: DonationRecord,
    /// The record as it was before the send, restored on cancellation.
    pub scraped: DonationRecord,
    pub cancel_requested: bool,
}

#[derive(Debug, Clone, Default)]
pub enum Phase {
    #[default]
    Idle,
    Scraped(DonationRecord),
    Sending(Attempt),
}

#[derive(Debug, Clone)]
pub enum Event {
    Scraped(DonationRecord),
    NameEdited(String),
    SendRequested,
    CancelRequested,
    Finished {
        attempt: AttemptId,
        result: AttemptResult,
    },
}

/// Side effects of a transition. The caller performs them in order.
#[derive(Debug, Clone)]
pub enum Effect {
    StartSend {
        attempt: AttemptId,
        record: DonationRecord,
    },
    CancelSend(AttemptId),
    Archive {
        record: DonationRecord,
        success: bool,
    },
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("a donation is already being sent")]
    SendInProgress,
    #[error("no donation scraped")]
    NothingToSend,
    #[error("no donation is being sent")]
    NotSending,
    #[error("the name cannot be edited while sending")]
    NameLocked,
    #[error(transparent)]
    InvalidName(#[from] NameError),
}

/// What the presentation layer renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionSnapshot {
    pub can_scrape: bool,
    pub can_send: bool,
    pub sending: bool,
    pub name_editable: bool,
    pub name_input: String,
    pub name_error: Option<String>,
    pub last_outcome: Option<Outcome>,
}

#[derive(Debug, Default)]
pub struct SubmissionState {
    phase: Phase,
    name_input: String,
    name_error: Option<NameError>,
    last_outcome: Option<Outcome>,
    next_attempt: u64,
}

impl SubmissionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn name_input(&self) -> &str {
        &self.name_input
    }

    pub fn name_error(&self) -> Option<NameError> {
        self.name_error
    }

    pub fn last_outcome(&self) -> Option<&Outcome> {
        self.last_outcome.as_ref()
    }

    pub fn is_sending(&self) -> bool {
        matches!(self.phase, Phase::Sending(_))
    }

    pub fn snapshot(&self) -> SubmissionSnapshot {
        SubmissionSnapshot {
            can_scrape: !self.is_sending(),
            can_send: matches!(self.phase, Phase::Scraped(_)),
            sending: self.is_sending(),
            name_editable: !self.is_sending(),
            name_input: self.name_input.clone(),
            name_error: self.name_error.map(|err| err.to_string()),
            last_outcome: self.last_outcome.clone(),
        }
    }

    /// Applies one event. A rejected event returns an error and leaves the
    /// phase unchanged; a refused send additionally records the name error.
    pub fn handle(&mut self, event: Event) -> Result<Vec<Effect>, WorkflowError> {
        match event {
            Event::Scraped(record) => self.on_scraped(record),
            Event::NameEdited(name) => self.on_name_edited(name),
            Event::SendRequested => self.on_send_requested(),
            Event::CancelRequested => self.on_cancel_requested(),
            Event::Finished { attempt, result } => Ok(self.on_finished(attempt, result)),
        }
    }

    fn on_scraped(&mut self, record: DonationRecord) -> Result<Vec<Effect>, WorkflowError> {
        if self.is_sending() {
            return Err(WorkflowError::SendInProgress);
        }

        if let Some(from) = record.from() {
            self.name_input = from.to_string();
        }
        self.name_error = None;
        self.phase = Phase::Scraped(record);
        Ok(Vec::new())
    }

    fn on_name_edited(&mut self, name: String) -> Result<Vec<Effect>, WorkflowError> {
        if self.is_sending() {
            return Err(WorkflowError::NameLocked);
        }

        self.name_input = name;
        self.name_error = None;
        Ok(Vec::new())
    }

    fn on_send_requested(&mut self) -> Result<Vec<Effect>, WorkflowError> {
        let scraped = match &self.phase {
            Phase::Idle => return Err(WorkflowError::NothingToSend),
            Phase::Sending(_) => return Err(WorkflowError::SendInProgress),
            Phase::Scraped(record) => record.clone(),
        };

        let name = match validate_display_name(&self.name_input) {
            Ok(name) => name,
            Err(err) => {
                self.name_error = Some(err);
                return Err(err.into());
            }
        };

        let record = scraped.with_from(name);
        let id = AttemptId(self.next_attempt);
        self.next_attempt += 1;

        self.phase = Phase::Sending(Attempt {
            id,
            record: record.clone(),
            scraped,
            cancel_requested: false,
        });
        self.name_error = None;

        Ok(vec![Effect::StartSend { attempt: id, record }])
    }

    fn on_cancel_requested(&mut self) -> Result<Vec<Effect>, WorkflowError> {
        let Phase::Sending(attempt) = &mut self.phase else {
            return Err(WorkflowError::NotSending);
        };

        if attempt.cancel_requested {
            return Ok(Vec::new());
        }

        attempt.cancel_requested = true;
        Ok(vec![Effect::CancelSend(attempt.id)])
    }

    fn on_finished(&mut self, id: AttemptId, result: AttemptResult) -> Vec<Effect> {
        let attempt = match std::mem::take(&mut self.phase) {
            Phase::Sending(attempt) if attempt.id == id => attempt,
            other => {
                // Already settled, or an older attempt.
                self.phase = other;
                return Vec::new();
            }
        };

        match result {
            AttemptResult::Completed(Ok(())) => {
                // The next donation may come from someone else.
                self.name_input.clear();
                self.last_outcome = Some(Outcome::Succeeded);
                vec![Effect::Archive {
                    record: attempt.record,
                    success: true,
                }]
            }
            AttemptResult::Completed(Err(reason)) => {
                // A retry needs a fresh scrape, the screenshot may be stale.
                self.last_outcome = Some(Outcome::Failed(reason));
                vec![Effect::Archive {
                    record: attempt.record,
                    success: false,
                }]
            }
            AttemptResult::Stopped => {
                if let Some(sent) = attempt.record.from() {
                    self.name_input = sent.to_string();
                }
                self.last_outcome = Some(Outcome::Cancelled);
                self.phase = Phase::Scraped(attempt.scraped);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;

    fn record(from: Option<&str>) -> DonationRecord {
        DonationRecord::new(
            from.map(str::to_string),
            "Receiver".into(),
            25_000,
            RgbaImage::new(2, 2),
        )
    }

    fn start(state: &mut SubmissionState, name: &str) -> AttemptId {
        state.handle(Event::Scraped(record(None))).unwrap();
        state.handle(Event::NameEdited(name.into())).unwrap();
        match state.handle(Event::SendRequested).unwrap().as_slice() {
            [Effect::StartSend { attempt, record }] => {
                assert_eq!(record.from(), Some(name));
                *attempt
            }
            other => panic!("unexpected effects {other:?}"),
        }
    }

    #[test]
    fn send_requires_a_scrape() {
        let mut state = SubmissionState::new();
        state.handle(Event::NameEdited("Zezima".into())).unwrap();
        assert_eq!(
            state.handle(Event::SendRequested).unwrap_err(),
            WorkflowError::NothingToSend
        );
    }

    #[test]
    fn scraped_sender_overrides_the_input() {
        let mut state = SubmissionState::new();
        state.handle(Event::NameEdited("Typed".into())).unwrap();

        state.handle(Event::Scraped(record(None))).unwrap();
        assert_eq!(state.name_input(), "Typed");

        state.handle(Event::Scraped(record(Some("Zezima")))).unwrap();
        assert_eq!(state.name_input(), "Zezima");
        assert!(state.snapshot().can_send);
    }

    #[test]
    fn invalid_name_refuses_the_send() {
        let mut state = SubmissionState::new();
        state.handle(Event::Scraped(record(None))).unwrap();

        for (name, expected) in [
            ("", NameError::Empty),
            (" Zezima", NameError::InvalidCharacters),
            ("Zez_ima", NameError::InvalidCharacters),
            ("ThirteenChars", NameError::TooLong),
        ] {
            state.handle(Event::NameEdited(name.into())).unwrap();
            assert_eq!(
                state.handle(Event::SendRequested).unwrap_err(),
                WorkflowError::InvalidName(expected)
            );
            assert!(matches!(state.phase(), Phase::Scraped(_)));
            assert_eq!(state.name_error(), Some(expected));
        }

        state.handle(Event::NameEdited("Zezima".into())).unwrap();
        assert_eq!(state.name_error(), None);
    }

    #[test]
    fn only_one_attempt_at_a_time() {
        let mut state = SubmissionState::new();
        start(&mut state, "Zezima");

        assert_eq!(
            state.handle(Event::SendRequested).unwrap_err(),
            WorkflowError::SendInProgress
        );
        assert_eq!(
            state.handle(Event::Scraped(record(None))).unwrap_err(),
            WorkflowError::SendInProgress
        );
        assert_eq!(
            state.handle(Event::NameEdited("Other".into())).unwrap_err(),
            WorkflowError::NameLocked
        );

        let snapshot = state.snapshot();
        assert!(!snapshot.can_scrape && !snapshot.can_send && !snapshot.name_editable);
    }

    #[test]
    fn success_archives_and_returns_to_idle() {
        let mut state = SubmissionState::new();
        let id = start(&mut state, "Zezima");

        let effects = state
            .handle(Event::Finished {
                attempt: id,
                result: AttemptResult::Completed(Ok(())),
            })
            .unwrap();

        assert!(matches!(
            effects.as_slice(),
            [Effect::Archive { record, success: true }] if record.from() == Some("Zezima")
        ));
        assert!(matches!(state.phase(), Phase::Idle));
        assert_eq!(state.last_outcome(), Some(&Outcome::Succeeded));
        assert!(state.snapshot().name_editable);
        assert!(state.name_input().is_empty());

        // A screen without a counterparty must not inherit the last donor.
        state.handle(Event::Scraped(record(None))).unwrap();
        assert!(state.name_input().is_empty());
        assert_eq!(
            state.handle(Event::SendRequested).unwrap_err(),
            WorkflowError::InvalidName(NameError::Empty)
        );
    }

    #[test]
    fn failure_archives_and_drops_the_record() {
        let mut state = SubmissionState::new();
        let id = start(&mut state, "Zezima");

        let effects = state
            .handle(Event::Finished {
                attempt: id,
                result: AttemptResult::Completed(Err("502".into())),
            })
            .unwrap();

        assert!(matches!(
            effects.as_slice(),
            [Effect::Archive { success: false, .. }]
        ));
        assert!(matches!(state.phase(), Phase::Idle));
        assert_eq!(state.last_outcome(), Some(&Outcome::Failed("502".into())));
        assert!(!state.snapshot().can_send);
    }

    #[test]
    fn confirmed_cancel_restores_the_scraped_record() {
        let mut state = SubmissionState::new();
        let id = start(&mut state, "Zezima");

        assert!(matches!(
            state.handle(Event::CancelRequested).unwrap().as_slice(),
            [Effect::CancelSend(cancelled)] if *cancelled == id
        ));
        // A second request while the first is in flight is a no-op.
        assert!(state.handle(Event::CancelRequested).unwrap().is_empty());

        let effects = state
            .handle(Event::Finished {
                attempt: id,
                result: AttemptResult::Stopped,
            })
            .unwrap();

        assert!(effects.is_empty());
        match state.phase() {
            Phase::Scraped(record) => assert_eq!(record.from(), None),
            other => panic!("unexpected phase {other:?}"),
        }
        assert_eq!(state.name_input(), "Zezima");
        assert_eq!(state.last_outcome(), Some(&Outcome::Cancelled));
    }

    #[test]
    fn completion_wins_over_a_late_cancel() {
        let mut state = SubmissionState::new();
        let id = start(&mut state, "Zezima");

        state.handle(Event::CancelRequested).unwrap();
        let effects = state
            .handle(Event::Finished {
                attempt: id,
                result: AttemptResult::Completed(Ok(())),
            })
            .unwrap();

        assert_eq!(effects.len(), 1);
        assert_eq!(state.last_outcome(), Some(&Outcome::Succeeded));
    }

    #[test]
    fn stale_results_are_ignored() {
        let mut state = SubmissionState::new();
        let first = start(&mut state, "Zezima");
        state
            .handle(Event::Finished {
                attempt: first,
                result: AttemptResult::Completed(Ok(())),
            })
            .unwrap();

        let second = start(&mut state, "Zezima");
        assert_ne!(first, second);

        for result in [AttemptResult::Completed(Ok(())), AttemptResult::Stopped] {
            let effects = state
                .handle(Event::Finished {
                    attempt: first,
                    result,
                })
                .unwrap();
            assert!(effects.is_empty());
        }
        assert!(state.is_sending());

        assert_eq!(
            state
                .handle(Event::Finished {
                    attempt: second,
                    result: AttemptResult::Stopped,
                })
                .unwrap()
                .len(),
            0
        );
        assert!(state
            .handle(Event::Finished {
                attempt: second,
                result: AttemptResult::Completed(Ok(())),
            })
            .unwrap()
            .is_empty());
    }

    #[test]
    fn cancel_without_a_send_is_rejected() {
        let mut state = SubmissionState::new();
        assert_eq!(
            state.handle(Event::CancelRequested).unwrap_err(),
            WorkflowError::NotSending
        );
    }
}
