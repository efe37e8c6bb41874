use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub profile: Profile,
}

/// Role-specialized profile data. Role fields are only reachable after
/// matching on the tag, so client-only fields cannot be read off a
/// freelancer and vice versa.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "kebab-case")]
pub enum Profile {
    Client(ClientProfile),
    Freelancer(FreelancerProfile),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientProfile {
    pub company: Option<String>,
    pub industry: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreelancerProfile {
    pub title: String,
    pub skills: Vec<String>,
    pub hourly_rate: Decimal,
    pub bio: String,
    pub location: Option<String>,
    pub experience_years: i32,
    pub availability: Availability,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Availability {
    Available,
    Limited,
    Unavailable,
}

impl User {
    pub fn as_freelancer(&self) -> Option<&FreelancerProfile> {
        match &self.profile {
            Profile::Freelancer(p) => Some(p),
            Profile::Client(_) => None,
        }
    }

    pub fn as_client(&self) -> Option<&ClientProfile> {
        match &self.profile {
            Profile::Client(p) => Some(p),
            Profile::Freelancer(_) => None,
        }
    }
}
