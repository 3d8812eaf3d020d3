//! Progress events emitted while a task runs.

use crate::consensus::Strategy;
use crate::lifecycle::Stage;
use crate::task::ComponentStatus;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    WaveStarted {
        task_id: String,
        wave: usize,
        components: Vec<String>,
    },
    ComponentStarted {
        component: String,
        wave: usize,
        stage: Stage,
    },
    StageChanged {
        component: String,
        from: Stage,
        to: Stage,
        checkpoint: Option<String>,
    },
    GateCompleted {
        unit: String,
        passed: bool,
        critical: usize,
        important: usize,
        reviewers: usize,
    },
    ConsensusReached {
        unit: String,
        tally: String,
        decision: Option<Strategy>,
    },
    ComponentFinished {
        component: String,
        status: ComponentStatus,
        stage: Stage,
    },
    WaveCompleted {
        wave: usize,
        completed: usize,
        blocked: usize,
        cancelled: usize,
    },
    TaskFinished {
        task_id: String,
        outcome: String,
    },
}

/// Optional event channel. Sending never fails the run; a closed receiver
/// just drops events.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<OrchestratorEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<OrchestratorEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub async fn emit(&self, event: OrchestratorEvent) {
        if let Some(ref tx) = self.tx {
            tx.send(event).await.ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = OrchestratorEvent::WaveStarted {
            task_id: "t1".into(),
            wave: 0,
            components: vec!["A".into()],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "wave_started");
        assert_eq!(json["components"][0], "A");
    }

    #[tokio::test]
    async fn test_sink_delivers_and_tolerates_closed_receiver() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = EventSink::new(tx);
        sink.emit(OrchestratorEvent::TaskFinished {
            task_id: "t1".into(),
            outcome: "COMPLETE".into(),
        })
        .await;
        assert!(matches!(
            rx.recv().await,
            Some(OrchestratorEvent::TaskFinished { .. })
        ));
        drop(rx);
        sink.emit(OrchestratorEvent::TaskFinished {
            task_id: "t1".into(),
            outcome: "COMPLETE".into(),
        })
        .await;
        EventSink::disabled()
            .emit(OrchestratorEvent::TaskFinished {
                task_id: "t1".into(),
                outcome: "COMPLETE".into(),
            })
            .await;
    }
}
