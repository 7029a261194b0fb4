use serde::{Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    Monthly,
    Yearly,
    Daily,
}

impl BillingCycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingCycle::Monthly => "monthly",
            BillingCycle::Yearly => "yearly",
            BillingCycle::Daily => "daily",
        }
    }
}

/// Space categories offered by the workspace. Anything the floor team types
/// that is not one of the known labels is kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SpaceCategory {
    HotDesk,
    DedicatedDesk,
    PrivateCabin,
    PrivateOffice,
    MeetingRoom,
    ConferenceRoom,
    VirtualOffice,
    Other(String),
}

pub const KNOWN_SPACE_CATEGORIES: &[SpaceCategory] = &[
    SpaceCategory::HotDesk,
    SpaceCategory::DedicatedDesk,
    SpaceCategory::PrivateCabin,
    SpaceCategory::PrivateOffice,
    SpaceCategory::MeetingRoom,
    SpaceCategory::ConferenceRoom,
    SpaceCategory::VirtualOffice,
];

fn normalize_label(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}

impl SpaceCategory {
    pub fn parse(raw: &str) -> Self {
        match normalize_label(raw).as_str() {
            "hotdesk" => SpaceCategory::HotDesk,
            "dedicateddesk" => SpaceCategory::DedicatedDesk,
            "privatecabin" | "cabin" => SpaceCategory::PrivateCabin,
            "privateoffice" => SpaceCategory::PrivateOffice,
            "meetingroom" => SpaceCategory::MeetingRoom,
            "conferenceroom" => SpaceCategory::ConferenceRoom,
            "virtualoffice" => SpaceCategory::VirtualOffice,
            _ => SpaceCategory::Other(raw.trim().to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            SpaceCategory::HotDesk => "Hot Desk",
            SpaceCategory::DedicatedDesk => "Dedicated Desk",
            SpaceCategory::PrivateCabin => "Private Cabin",
            SpaceCategory::PrivateOffice => "Private Office",
            SpaceCategory::MeetingRoom => "Meeting Room",
            SpaceCategory::ConferenceRoom => "Conference Room",
            SpaceCategory::VirtualOffice => "Virtual Office",
            SpaceCategory::Other(label) => label.as_str(),
        }
    }
}

impl fmt::Display for SpaceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for SpaceCategory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// Per-use rooms bill by the day, the registered-address product bills yearly,
/// everything else (including categories we do not know yet) bills monthly.
pub fn cycle_of(category: &SpaceCategory) -> BillingCycle {
    match category {
        SpaceCategory::MeetingRoom | SpaceCategory::ConferenceRoom => BillingCycle::Daily,
        SpaceCategory::VirtualOffice => BillingCycle::Yearly,
        _ => BillingCycle::Monthly,
    }
}
