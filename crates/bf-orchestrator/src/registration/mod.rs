//! Remote registration

mod meetingbaas;

pub use meetingbaas::{build_request_body, MeetingBaasClient, API_KEY_HEADER};
