use serde::{Deserialize, Serialize};

const ABSENT_VALUES: [&str; 6] = ["", "none", "n/a", "-", "null", "unknown"];

const PLACEHOLDER_DEVICE_IDS: [&str; 9] = [
    "",
    "unknown",
    "none",
    "null",
    "localhost",
    "127.0.0.1",
    "::1",
    "0.0.0.0",
    "raspberrypi",
];

const COUNTRY_ALIASES: [(&str, &str); 18] = [
    ("uk", "GBP"),
    ("gb", "GBP"),
    ("gbr", "GBP"),
    ("gbp", "GBP"),
    ("united kingdom", "GBP"),
    ("great britain", "GBP"),
    ("england", "GBP"),
    ("us", "USD"),
    ("usa", "USD"),
    ("usd", "USD"),
    ("united states", "USD"),
    ("united states of america", "USD"),
    ("america", "USD"),
    ("eu", "EUR"),
    ("eur", "EUR"),
    ("europe", "EUR"),
    ("eurozone", "EUR"),
    ("european union", "EUR"),
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawIdentity {
    pub name: Option<String>,
    pub country: Option<String>,
    pub code: Option<String>,
    pub address: Option<String>,
}

impl RawIdentity {
    pub fn is_empty(&self) -> bool {
        canonicalize(self) == Identity::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(default, alias = "kiosk_name")]
    pub name: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

impl Identity {
    pub fn fingerprint(&self) -> String {
        [
            self.name.as_deref().map(str::to_lowercase),
            self.country.clone(),
            self.code.clone(),
            self.address.as_deref().map(str::to_lowercase),
        ]
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect::<Vec<_>>()
        .join("|")
    }

    pub fn merged_with(&self, incoming: &Identity) -> Identity {
        Identity {
            name: incoming.name.clone().or_else(|| self.name.clone()),
            country: incoming.country.clone().or_else(|| self.country.clone()),
            code: incoming.code.clone().or_else(|| self.code.clone()),
            address: incoming.address.clone().or_else(|| self.address.clone()),
        }
    }

    pub fn display_name(&self, fallback_id: &str) -> String {
        self.name
            .clone()
            .or_else(|| self.code.clone())
            .unwrap_or_else(|| fallback_id.to_string())
    }
}

pub fn canonicalize(raw: &RawIdentity) -> Identity {
    Identity {
        name: clean_field(raw.name.as_deref()),
        country: raw.country.as_deref().and_then(canonical_country),
        code: clean_field(raw.code.as_deref()).map(|c| c.to_uppercase()),
        address: clean_field(raw.address.as_deref()),
    }
}

pub fn clean_field(value: Option<&str>) -> Option<String> {
    let collapsed = value?.split_whitespace().collect::<Vec<_>>().join(" ");
    let lowered = collapsed.to_lowercase();
    if ABSENT_VALUES.contains(&lowered.as_str()) {
        return None;
    }
    Some(collapsed)
}

pub fn canonical_country(value: &str) -> Option<String> {
    let cleaned = clean_field(Some(value))?;
    let lowered = cleaned.to_lowercase();
    let code = COUNTRY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lowered)
        .map(|(_, code)| code.to_string())
        .unwrap_or_else(|| cleaned.to_uppercase());
    Some(code)
}

// Placeholder ids collide across devices; a kiosk code replaces them when sent.
pub fn normalize_device_id(raw: Option<&str>, code: Option<&str>) -> Option<String> {
    let trimmed = raw.map(str::trim).unwrap_or_default();
    if !PLACEHOLDER_DEVICE_IDS.contains(&trimmed.to_lowercase().as_str()) {
        return Some(trimmed.to_string());
    }

    match clean_field(code) {
        Some(code) => Some(format!("kiosk-{}", code.to_lowercase())),
        None if trimmed.is_empty() => None,
        None => Some(trimmed.to_string()),
    }
}

pub fn identity_key(identity: Option<&Identity>, id: &str) -> String {
    let Some(identity) = identity else {
        return id.to_string();
    };
    if let Some(code) = &identity.code {
        return code.clone();
    }
    match &identity.name {
        Some(name) => format!(
            "{}::{}",
            identity.country.as_deref().unwrap_or_default(),
            name.to_lowercase()
        ),
        None => id.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityChange {
    pub id: String,
    pub previous: Option<Identity>,
    pub current: Identity,
    pub notify: bool,
}
