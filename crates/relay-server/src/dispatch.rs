//! Per-frame routing of inbound client messages.
//!
//! Handling is split in two: [`Dispatcher::plan`] turns one decoded message
//! into a list of [`Delivery`] actions (consulting the hub and the lookup
//! collaborator), and [`deliver`] encodes and enqueues them. Planning holds
//! no state between frames.

use std::sync::Arc;

use relay_core::{
    ClientMessage, DataLookup, DocumentRef, ParticipantId, RelayError, Role, ServerMessage,
};
use tracing::{debug, instrument, warn};

use crate::hub::RelayHub;
use crate::registry::Connection;

/// One outbound message bound for one connection.
#[derive(Debug)]
pub struct Delivery {
    pub target: Arc<Connection>,
    pub message: ServerMessage,
}

impl Delivery {
    pub fn new(target: Arc<Connection>, message: ServerMessage) -> Self {
        Self { target, message }
    }
}

/// Encode and enqueue each delivery in order. Returns how many were queued.
///
/// A closed target queue or an encode failure skips that delivery only.
pub async fn deliver(deliveries: Vec<Delivery>) -> usize {
    let mut queued = 0;
    for Delivery { target, message } in deliveries {
        let frame = match message.encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(
                    target_id = %target.participant,
                    error_kind = e.error_kind(),
                    error = %e,
                    "dropping outbound message"
                );
                continue;
            }
        };
        match target.enqueue(frame).await {
            Ok(()) => queued += 1,
            Err(e) => {
                warn!(
                    target_id = %target.participant,
                    message_type = message.type_tag(),
                    error_kind = e.error_kind(),
                    "delivery skipped"
                );
            }
        }
    }
    queued
}

/// Builds document URLs under the records service base.
#[derive(Clone, Debug)]
pub struct RecordLinks {
    base_url: String,
}

impl RecordLinks {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    pub fn medical_record(&self, patient: ParticipantId, case_id: &str) -> String {
        format!("{}{}/{}", self.base_url, patient, case_id)
    }

    pub fn prescription(&self, patient: ParticipantId, case_id: &str) -> String {
        format!("{}{}/{}/prescription", self.base_url, patient, case_id)
    }
}

pub struct Dispatcher {
    hub: Arc<RelayHub>,
    lookup: Arc<dyn DataLookup>,
    links: RecordLinks,
}

impl Dispatcher {
    pub fn new(hub: Arc<RelayHub>, lookup: Arc<dyn DataLookup>, links: RecordLinks) -> Self {
        Self { hub, lookup, links }
    }

    /// Decode, plan and deliver one inbound text frame from `sender`.
    #[instrument(skip_all, fields(participant = %sender.participant))]
    pub async fn handle_frame(
        &self,
        sender: &Arc<Connection>,
        frame: &str,
    ) -> Result<usize, RelayError> {
        let message = ClientMessage::decode(frame)?;
        debug!(kind = message.kind_name(), "inbound message");
        let deliveries = self.plan(sender, message).await?;
        Ok(deliver(deliveries).await)
    }

    /// Work out what `message` from `sender` should produce.
    pub async fn plan(
        &self,
        sender: &Arc<Connection>,
        message: ClientMessage,
    ) -> Result<Vec<Delivery>, RelayError> {
        let from = sender.participant;
        match message {
            ClientMessage::Chat {
                receiver,
                content,
                time,
            } => {
                let target = self.hub.resolve_target(from, receiver)?;
                Ok(vec![Delivery::new(
                    target,
                    ServerMessage::ChatDelivery {
                        sender: from,
                        receiver,
                        content,
                        time,
                    },
                )])
            }
            ClientMessage::CloseChat { receiver } => {
                let target = self.hub.resolve_target(from, receiver)?;
                Ok(vec![Delivery::new(target, ServerMessage::ChatTerminated)])
            }
            ClientMessage::RequestMedicalRecord { patient, doctor } => {
                let target = self.hub.resolve_target(from, patient)?;
                let case = self.lookup.latest_case(patient).await?;
                let case_id = case.map(|c| c.id.to_string());
                let doc = DocumentRef {
                    patient,
                    doctor: doctor.or_else(|| responder_id(sender)),
                    url: case_id
                        .as_deref()
                        .map(|c| self.links.medical_record(patient, c)),
                    case_id,
                };
                Ok(to_both(sender, target, ServerMessage::MedicalRecord(doc)))
            }
            ClientMessage::RequestPrescription {
                patient,
                doctor,
                case_id,
            } => {
                let target = self.hub.resolve_target(from, patient)?;
                let case_id = match requested_case(case_id)? {
                    Some(c) => Some(c),
                    None => {
                        let latest = self.lookup.latest_case(patient).await?;
                        latest.map(|c| c.id.to_string())
                    }
                };
                let doc = DocumentRef {
                    patient,
                    doctor: doctor.or_else(|| responder_id(sender)),
                    url: case_id
                        .as_deref()
                        .map(|c| self.links.prescription(patient, c)),
                    case_id,
                };
                Ok(to_both(sender, target, ServerMessage::Prescription(doc)))
            }
            ClientMessage::RequestQuestions => {
                let questions = self.lookup.question_set(from).await?;
                let reply = ServerMessage::Questions { questions };
                Ok(vec![Delivery::new(sender.clone(), reply)])
            }
        }
    }
}

/// A client-supplied case id, trimmed. Blank means "use the latest case".
/// Case ids are numeric; anything else would leak into the document URL.
fn requested_case(case_id: Option<String>) -> Result<Option<String>, RelayError> {
    let Some(raw) = case_id else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RelayError::MalformedMessage(
            "caseID must be numeric".to_string(),
        ));
    }
    Ok(Some(trimmed.to_string()))
}

fn responder_id(conn: &Connection) -> Option<ParticipantId> {
    (conn.role == Role::Responder).then_some(conn.participant)
}

fn to_both(
    sender: &Arc<Connection>,
    target: Arc<Connection>,
    message: ServerMessage,
) -> Vec<Delivery> {
    if Arc::ptr_eq(sender, &target) {
        return vec![Delivery::new(target, message)];
    }
    vec![
        Delivery::new(sender.clone(), message.clone()),
        Delivery::new(target, message),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::{InMemoryDirectory, LookupError};
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    const BASE: &str = "https://records.test/record_p/";

    fn id(raw: u64) -> ParticipantId {
        ParticipantId::new(raw)
    }

    fn setup(dir: InMemoryDirectory) -> (Arc<RelayHub>, Dispatcher) {
        let hub = Arc::new(RelayHub::new(8));
        let links = RecordLinks::new(BASE);
        let dispatcher = Dispatcher::new(hub.clone(), Arc::new(dir), links);
        (hub, dispatcher)
    }

    fn recv_json(rx: &mut mpsc::Receiver<String>) -> Value {
        let frame = rx.try_recv().expect("expected a queued frame");
        serde_json::from_str(&frame).unwrap()
    }

    struct FailingLookup;

    #[async_trait::async_trait]
    impl DataLookup for FailingLookup {
        async fn display_name(&self, _: ParticipantId) -> Result<Option<String>, LookupError> {
            Err(LookupError::Backend("down".into()))
        }
        async fn latest_case(
            &self,
            _: ParticipantId,
        ) -> Result<Option<relay_core::CaseRecord>, LookupError> {
            Err(LookupError::Backend("down".into()))
        }
        async fn question_set(&self, _: ParticipantId) -> Result<Option<String>, LookupError> {
            Err(LookupError::Backend("down".into()))
        }
    }

    #[tokio::test]
    async fn chat_to_paired_peer_is_delivered_once() {
        let (hub, dispatcher) = setup(InMemoryDirectory::new());
        let (patient, mut patient_rx) = hub.connect(id(1), Role::Requester);
        let (doctor, mut doctor_rx) = hub.connect(id(2), Role::Responder);
        hub.pair(id(1), id(2));

        let frame = r#"{"type":1,"senderID":99,"receiverID":1,"content":"hello","time":"T"}"#;
        let queued = dispatcher.handle_frame(&doctor, frame).await.unwrap();
        assert_eq!(queued, 1);
        assert_eq!(
            recv_json(&mut patient_rx),
            json!({
                "type": 7,
                "senderID": 2,
                "receiverID": 1,
                "content": "hello",
                "time": "T",
            })
        );
        assert!(patient_rx.try_recv().is_err());
        assert!(doctor_rx.try_recv().is_err());
        drop(patient);
    }

    #[tokio::test]
    async fn chat_from_unpaired_sender_enqueues_nothing() {
        let (hub, dispatcher) = setup(InMemoryDirectory::new());
        let (_patient, mut patient_rx) = hub.connect(id(1), Role::Requester);
        let (doctor, mut doctor_rx) = hub.connect(id(2), Role::Responder);

        let err = dispatcher
            .handle_frame(&doctor, r#"{"type":1,"receiverID":1,"content":"hi"}"#)
            .await
            .unwrap_err();
        assert_eq!(err, RelayError::PeerNotPaired { sender: id(2) });
        assert!(patient_rx.try_recv().is_err());
        assert!(doctor_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn chat_to_unpaired_target_is_not_authorized() {
        let (hub, dispatcher) = setup(InMemoryDirectory::new());
        let (_a, mut a_rx) = hub.connect(id(1), Role::Requester);
        let (_c, mut c_rx) = hub.connect(id(3), Role::Requester);
        let (doctor, _d_rx) = hub.connect(id(2), Role::Responder);
        hub.pair(id(1), id(2));

        let err = dispatcher
            .handle_frame(&doctor, r#"{"type":1,"receiverID":3,"content":"hi"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::PeerNotAuthorized { .. }));
        assert!(a_rx.try_recv().is_err());
        assert!(c_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn chat_to_departed_peer_is_disconnected() {
        let (hub, dispatcher) = setup(InMemoryDirectory::new());
        let (doctor, _rx) = hub.connect(id(2), Role::Responder);
        hub.pair(id(1), id(2));

        let err = dispatcher
            .handle_frame(&doctor, r#"{"type":2,"receiverID":1}"#)
            .await
            .unwrap_err();
        assert_eq!(err, RelayError::PeerDisconnected { target: id(1) });
    }

    #[tokio::test]
    async fn close_chat_notifies_receiver_only_and_keeps_pairing() {
        let (hub, dispatcher) = setup(InMemoryDirectory::new());
        let (patient, mut patient_rx) = hub.connect(id(1), Role::Requester);
        let (_doctor, mut doctor_rx) = hub.connect(id(2), Role::Responder);
        hub.pair(id(1), id(2));

        dispatcher
            .handle_frame(&patient, r#"{"type":2,"receiverID":2}"#)
            .await
            .unwrap();
        assert_eq!(recv_json(&mut doctor_rx), json!({"type": 11}));
        assert!(patient_rx.try_recv().is_err());
        assert!(hub.can_reach(id(1), id(2)));
    }

    #[tokio::test]
    async fn medical_record_goes_to_both_sides() {
        let dir = InMemoryDirectory::new();
        dir.add_case(id(1), 40, "2026-02-01");
        dir.add_case(id(1), 41, "2026-05-01");
        let (hub, dispatcher) = setup(dir);
        let (_patient, mut patient_rx) = hub.connect(id(1), Role::Requester);
        let (doctor, mut doctor_rx) = hub.connect(id(2), Role::Responder);
        hub.pair(id(1), id(2));

        let queued = dispatcher
            .handle_frame(&doctor, r#"{"type":3,"patientID":1}"#)
            .await
            .unwrap();
        assert_eq!(queued, 2);
        let expected = json!({
            "type": 8,
            "patientID": 1,
            "doctorID": 2,
            "caseID": "41",
            "url": "https://records.test/record_p/1/41",
        });
        assert_eq!(recv_json(&mut doctor_rx), expected);
        assert_eq!(recv_json(&mut patient_rx), expected);
    }

    #[tokio::test]
    async fn medical_record_without_case_omits_url() {
        let (hub, dispatcher) = setup(InMemoryDirectory::new());
        let (_patient, _patient_rx) = hub.connect(id(1), Role::Requester);
        let (doctor, mut doctor_rx) = hub.connect(id(2), Role::Responder);
        hub.pair(id(1), id(2));

        dispatcher
            .handle_frame(&doctor, r#"{"type":3,"patientID":1}"#)
            .await
            .unwrap();
        assert_eq!(
            recv_json(&mut doctor_rx),
            json!({"type": 8, "patientID": 1, "doctorID": 2})
        );
    }

    #[tokio::test]
    async fn prescription_prefers_requested_case() {
        let dir = InMemoryDirectory::new();
        dir.add_case(id(1), 41, "2026-05-01");
        let (hub, dispatcher) = setup(dir);
        let (_patient, mut patient_rx) = hub.connect(id(1), Role::Requester);
        let (doctor, mut doctor_rx) = hub.connect(id(2), Role::Responder);
        hub.pair(id(1), id(2));

        dispatcher
            .handle_frame(&doctor, r#"{"type":4,"patientID":1,"caseID":"7"}"#)
            .await
            .unwrap();
        let value = recv_json(&mut doctor_rx);
        assert_eq!(value["type"], 9);
        assert_eq!(
            value["url"],
            "https://records.test/record_p/1/7/prescription"
        );
        assert_eq!(recv_json(&mut patient_rx), value);

        dispatcher
            .handle_frame(&doctor, r#"{"type":4,"patientID":1}"#)
            .await
            .unwrap();
        let value = recv_json(&mut doctor_rx);
        assert_eq!(value["caseID"], "41");
        assert_eq!(
            value["url"],
            "https://records.test/record_p/1/41/prescription"
        );
    }

    #[tokio::test]
    async fn prescription_rejects_non_numeric_case() {
        let dir = InMemoryDirectory::new();
        dir.add_case(id(1), 41, "2026-05-01");
        let (hub, dispatcher) = setup(dir);
        let (_patient, mut patient_rx) = hub.connect(id(1), Role::Requester);
        let (doctor, mut doctor_rx) = hub.connect(id(2), Role::Responder);
        hub.pair(id(1), id(2));

        for case in [r#""../x?y""#, r#""7/../../admin""#, r#""4 2""#] {
            let frame = format!(r#"{{"type":4,"patientID":1,"caseID":{case}}}"#);
            let err = dispatcher.handle_frame(&doctor, &frame).await.unwrap_err();
            assert_eq!(err.error_kind(), "malformed_message", "case {case}");
        }
        assert!(patient_rx.try_recv().is_err());
        assert!(doctor_rx.try_recv().is_err());

        // Surrounding whitespace is not part of the id.
        dispatcher
            .handle_frame(&doctor, r#"{"type":4,"patientID":1,"caseID":" 12 "}"#)
            .await
            .unwrap();
        let value = recv_json(&mut doctor_rx);
        assert_eq!(value["caseID"], "12");
        assert_eq!(
            value["url"],
            "https://records.test/record_p/1/12/prescription"
        );
    }

    #[tokio::test]
    async fn document_request_for_unpaired_patient_is_rejected() {
        let (hub, dispatcher) = setup(InMemoryDirectory::new());
        let (_patient, mut patient_rx) = hub.connect(id(1), Role::Requester);
        let (doctor, mut doctor_rx) = hub.connect(id(2), Role::Responder);
        hub.pair(id(2), id(5));

        let err = dispatcher
            .handle_frame(&doctor, r#"{"type":3,"patientID":1}"#)
            .await
            .unwrap_err();
        assert!(err.is_routing());
        assert!(patient_rx.try_recv().is_err());
        assert!(doctor_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn questions_go_to_sender_only() {
        let dir = InMemoryDirectory::new();
        dir.assign_category(id(2), 3);
        dir.set_questions(3, "Any allergies?");
        let (hub, dispatcher) = setup(dir);
        let (_patient, mut patient_rx) = hub.connect(id(1), Role::Requester);
        let (doctor, mut doctor_rx) = hub.connect(id(2), Role::Responder);
        hub.pair(id(1), id(2));

        dispatcher
            .handle_frame(&doctor, r#"{"type":5}"#)
            .await
            .unwrap();
        assert_eq!(
            recv_json(&mut doctor_rx),
            json!({"type": 10, "questions": "Any allergies?"})
        );
        assert!(patient_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn questions_need_no_pairing() {
        let (hub, dispatcher) = setup(InMemoryDirectory::new());
        let (doctor, mut doctor_rx) = hub.connect(id(2), Role::Responder);

        dispatcher
            .handle_frame(&doctor, r#"{"type":5}"#)
            .await
            .unwrap();
        assert_eq!(recv_json(&mut doctor_rx), json!({"type": 10}));
    }

    #[tokio::test]
    async fn malformed_and_unknown_frames_are_rejected() {
        let (hub, dispatcher) = setup(InMemoryDirectory::new());
        let (doctor, mut doctor_rx) = hub.connect(id(2), Role::Responder);

        let err = dispatcher.handle_frame(&doctor, "{nope").await.unwrap_err();
        assert_eq!(err.error_kind(), "malformed_message");
        let err = dispatcher
            .handle_frame(&doctor, r#"{"type":99}"#)
            .await
            .unwrap_err();
        assert_eq!(err, RelayError::UnknownMessageType(99));
        assert!(doctor_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn lookup_failure_drops_frame() {
        let hub = Arc::new(RelayHub::new(8));
        let links = RecordLinks::new(BASE);
        let dispatcher = Dispatcher::new(hub.clone(), Arc::new(FailingLookup), links);
        let (_patient, mut patient_rx) = hub.connect(id(1), Role::Requester);
        let (doctor, mut doctor_rx) = hub.connect(id(2), Role::Responder);
        hub.pair(id(1), id(2));

        let err = dispatcher
            .handle_frame(&doctor, r#"{"type":3,"patientID":1}"#)
            .await
            .unwrap_err();
        assert_eq!(err.error_kind(), "lookup_failed");
        assert!(patient_rx.try_recv().is_err());
        assert!(doctor_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn deliver_skips_closed_queue() {
        let hub = RelayHub::new(8);
        let (open, mut open_rx) = hub.connect(id(1), Role::Requester);
        let (closed, _closed_rx) = hub.connect(id(2), Role::Responder);
        closed.close();

        let queued = deliver(vec![
            Delivery::new(closed, ServerMessage::ChatTerminated),
            Delivery::new(open, ServerMessage::ChatTerminated),
        ])
        .await;
        assert_eq!(queued, 1);
        assert_eq!(recv_json(&mut open_rx), json!({"type": 11}));
    }

    #[test]
    fn record_links() {
        let links = RecordLinks::new(BASE);
        assert_eq!(
            links.medical_record(id(4), "9"),
            "https://records.test/record_p/4/9"
        );
        assert_eq!(
            links.prescription(id(4), "9"),
            "https://records.test/record_p/4/9/prescription"
        );
    }
}
