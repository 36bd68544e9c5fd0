//! Wire envelope and the typed messages carried inside it.
//!
//! Every frame is one JSON object whose `type` tag selects the variant. The
//! envelope is a superset of all variant fields; absent fields are omitted
//! on output, never written as `null`. Legacy clients spell fields in
//! PascalCase (`SenderID`, `Url`), which is accepted on input.

use serde::{Deserialize, Serialize};

use crate::errors::RelayError;
use crate::ids::{ParticipantId, Role};

/// Numeric `type` tags.
pub mod tag {
    pub const CHAT: i64 = 1;
    pub const CLOSE_CHAT: i64 = 2;
    pub const REQUEST_MEDICAL_RECORD: i64 = 3;
    pub const REQUEST_PRESCRIPTION: i64 = 4;
    pub const REQUEST_QUESTIONS: i64 = 5;

    pub const CHAT_PAIRED: i64 = 6;
    pub const CHAT_DELIVERY: i64 = 7;
    pub const MEDICAL_RECORD: i64 = 8;
    pub const PRESCRIPTION: i64 = 9;
    pub const QUESTIONS: i64 = 10;
    pub const CHAT_TERMINATED: i64 = 11;
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type", alias = "Type")]
    pub kind: i64,
    /// Raw role tag. Kept as an integer so an unexpected value never
    /// rejects an otherwise valid frame; see [`Envelope::role`].
    #[serde(alias = "Role", default, skip_serializing_if = "Option::is_none")]
    pub role: Option<i64>,
    #[serde(
        rename = "senderID",
        alias = "SenderID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sender_id: Option<ParticipantId>,
    #[serde(
        rename = "receiverID",
        alias = "ReceiverID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub receiver_id: Option<ParticipantId>,
    #[serde(
        rename = "patientID",
        alias = "PatientID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub patient_id: Option<ParticipantId>,
    #[serde(
        rename = "doctorID",
        alias = "DoctorID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub doctor_id: Option<ParticipantId>,
    #[serde(alias = "Content", default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(alias = "Time", default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(
        rename = "caseID",
        alias = "CaseID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub case_id: Option<String>,
    #[serde(
        alias = "Url",
        alias = "URL",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub url: Option<String>,
    #[serde(alias = "Questions", default, skip_serializing_if = "Option::is_none")]
    pub questions: Option<String>,
    #[serde(
        rename = "patientName",
        alias = "PatientName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub patient_name: Option<String>,
    #[serde(
        rename = "doctorName",
        alias = "DoctorName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub doctor_name: Option<String>,
}

impl Envelope {
    fn of_kind(kind: i64) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    /// The role tag as a [`Role`], or `None` when absent or unrecognised.
    pub fn role(&self) -> Option<Role> {
        let tag = u8::try_from(self.role?).ok()?;
        Role::try_from(tag).ok()
    }
}

/// A frame sent by a connected participant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientMessage {
    Chat {
        receiver: ParticipantId,
        content: Option<String>,
        time: Option<String>,
    },
    CloseChat { receiver: ParticipantId },
    RequestMedicalRecord {
        patient: ParticipantId,
        doctor: Option<ParticipantId>,
    },
    RequestPrescription {
        patient: ParticipantId,
        doctor: Option<ParticipantId>,
        case_id: Option<String>,
    },
    RequestQuestions,
}

impl ClientMessage {
    /// Parse one inbound text frame.
    pub fn decode(frame: &str) -> Result<Self, RelayError> {
        let envelope: Envelope = serde_json::from_str(frame)
            .map_err(|e| RelayError::MalformedMessage(e.to_string()))?;
        Self::try_from(envelope)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Chat { .. } => "chat",
            Self::CloseChat { .. } => "close_chat",
            Self::RequestMedicalRecord { .. } => "request_medical_record",
            Self::RequestPrescription { .. } => "request_prescription",
            Self::RequestQuestions => "request_questions",
        }
    }
}

fn required(
    field: Option<ParticipantId>,
    name: &str,
    kind: i64,
) -> Result<ParticipantId, RelayError> {
    field.ok_or_else(|| RelayError::MalformedMessage(format!("type {kind} requires {name}")))
}

impl TryFrom<Envelope> for ClientMessage {
    type Error = RelayError;

    fn try_from(env: Envelope) -> Result<Self, Self::Error> {
        match env.kind {
            tag::CHAT => Ok(Self::Chat {
                receiver: required(env.receiver_id, "receiverID", env.kind)?,
                content: env.content,
                time: env.time,
            }),
            tag::CLOSE_CHAT => Ok(Self::CloseChat {
                receiver: required(env.receiver_id, "receiverID", env.kind)?,
            }),
            tag::REQUEST_MEDICAL_RECORD => Ok(Self::RequestMedicalRecord {
                patient: required(env.patient_id, "patientID", env.kind)?,
                doctor: env.doctor_id,
            }),
            tag::REQUEST_PRESCRIPTION => Ok(Self::RequestPrescription {
                patient: required(env.patient_id, "patientID", env.kind)?,
                doctor: env.doctor_id,
                case_id: env.case_id,
            }),
            tag::REQUEST_QUESTIONS => Ok(Self::RequestQuestions),
            other => Err(RelayError::UnknownMessageType(other)),
        }
    }
}

/// A document link handed to both sides of a chat.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentRef {
    pub patient: ParticipantId,
    pub doctor: Option<ParticipantId>,
    pub case_id: Option<String>,
    pub url: Option<String>,
}

/// A frame produced by the relay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerMessage {
    /// Sent to each side when a chat starts; `receiver` is the addressee.
    ChatPaired {
        receiver: ParticipantId,
        patient: ParticipantId,
        doctor: ParticipantId,
        patient_name: Option<String>,
        doctor_name: Option<String>,
    },
    ChatDelivery {
        sender: ParticipantId,
        receiver: ParticipantId,
        content: Option<String>,
        time: Option<String>,
    },
    MedicalRecord(DocumentRef),
    Prescription(DocumentRef),
    Questions { questions: Option<String> },
    ChatTerminated,
}

impl ServerMessage {
    pub fn type_tag(&self) -> i64 {
        match self {
            Self::ChatPaired { .. } => tag::CHAT_PAIRED,
            Self::ChatDelivery { .. } => tag::CHAT_DELIVERY,
            Self::MedicalRecord(_) => tag::MEDICAL_RECORD,
            Self::Prescription(_) => tag::PRESCRIPTION,
            Self::Questions { .. } => tag::QUESTIONS,
            Self::ChatTerminated => tag::CHAT_TERMINATED,
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        let mut env = Envelope::of_kind(self.type_tag());
        match self {
            Self::ChatPaired {
                receiver,
                patient,
                doctor,
                patient_name,
                doctor_name,
            } => {
                env.receiver_id = Some(*receiver);
                env.patient_id = Some(*patient);
                env.doctor_id = Some(*doctor);
                env.patient_name = patient_name.clone();
                env.doctor_name = doctor_name.clone();
            }
            Self::ChatDelivery {
                sender,
                receiver,
                content,
                time,
            } => {
                env.sender_id = Some(*sender);
                env.receiver_id = Some(*receiver);
                env.content = content.clone();
                env.time = time.clone();
            }
            Self::MedicalRecord(doc) | Self::Prescription(doc) => {
                env.patient_id = Some(doc.patient);
                env.doctor_id = doc.doctor;
                env.case_id = doc.case_id.clone();
                env.url = doc.url.clone();
            }
            Self::Questions { questions } => {
                env.questions = questions.clone();
            }
            Self::ChatTerminated => {}
        }
        env
    }

    /// Serialize to the JSON text frame written on the wire.
    pub fn encode(&self) -> Result<String, RelayError> {
        serde_json::to_string(&self.to_envelope())
            .map_err(|e| RelayError::Encode(e.to_string()))
    }
}
