//! Region code to capture-environment locale/timezone mapping

use serde::Serialize;

/// Timezone used for any region code not in the table.
pub const DEFAULT_TIMEZONE: &str = "America/New_York";

/// Locale used for any region code not in the table.
pub const DEFAULT_LOCALE: &str = "en-US";

/// Locale and timezone the capture environment is configured with
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionSettings {
    pub locale: &'static str,
    pub timezone: &'static str,
}

/// A known region
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RegionProfile {
    pub code: &'static str,
    pub name: &'static str,
    pub locale: &'static str,
    pub timezone: &'static str,
}

const fn us(code: &'static str, name: &'static str, timezone: &'static str) -> RegionProfile {
    RegionProfile {
        code,
        name,
        locale: "en-US",
        timezone,
    }
}

pub const REGIONS: &[RegionProfile] = &[
    us("US-AL", "Alabama", "America/Chicago"),
    us("US-AK", "Alaska", "America/Anchorage"),
    us("US-AZ", "Arizona", "America/Phoenix"),
    us("US-AR", "Arkansas", "America/Chicago"),
    us("US-CA", "California", "America/Los_Angeles"),
    us("US-CO", "Colorado", "America/Denver"),
    us("US-CT", "Connecticut", "America/New_York"),
    us("US-DE", "Delaware", "America/New_York"),
    us("US-DC", "District of Columbia", "America/New_York"),
    us("US-FL", "Florida", "America/New_York"),
    us("US-GA", "Georgia", "America/New_York"),
    us("US-HI", "Hawaii", "Pacific/Honolulu"),
    us("US-ID", "Idaho", "America/Boise"),
    us("US-IL", "Illinois", "America/Chicago"),
    us("US-IN", "Indiana", "America/Indiana/Indianapolis"),
    us("US-IA", "Iowa", "America/Chicago"),
    us("US-KS", "Kansas", "America/Chicago"),
    us("US-KY", "Kentucky", "America/New_York"),
    us("US-LA", "Louisiana", "America/Chicago"),
    us("US-ME", "Maine", "America/New_York"),
    us("US-MD", "Maryland", "America/New_York"),
    us("US-MA", "Massachusetts", "America/New_York"),
    us("US-MI", "Michigan", "America/Detroit"),
    us("US-MN", "Minnesota", "America/Chicago"),
    us("US-MS", "Mississippi", "America/Chicago"),
    us("US-MO", "Missouri", "America/Chicago"),
    us("US-MT", "Montana", "America/Denver"),
    us("US-NE", "Nebraska", "America/Chicago"),
    us("US-NV", "Nevada", "America/Los_Angeles"),
    us("US-NH", "New Hampshire", "America/New_York"),
    us("US-NJ", "New Jersey", "America/New_York"),
    us("US-NM", "New Mexico", "America/Denver"),
    us("US-NY", "New York", "America/New_York"),
    us("US-NC", "North Carolina", "America/New_York"),
    us("US-ND", "North Dakota", "America/Chicago"),
    us("US-OH", "Ohio", "America/New_York"),
    us("US-OK", "Oklahoma", "America/Chicago"),
    us("US-OR", "Oregon", "America/Los_Angeles"),
    us("US-PA", "Pennsylvania", "America/New_York"),
    us("US-RI", "Rhode Island", "America/New_York"),
    us("US-SC", "South Carolina", "America/New_York"),
    us("US-SD", "South Dakota", "America/Chicago"),
    us("US-TN", "Tennessee", "America/Chicago"),
    us("US-TX", "Texas", "America/Chicago"),
    us("US-UT", "Utah", "America/Denver"),
    us("US-VT", "Vermont", "America/New_York"),
    us("US-VA", "Virginia", "America/New_York"),
    us("US-WA", "Washington", "America/Los_Angeles"),
    us("US-WV", "West Virginia", "America/New_York"),
    us("US-WI", "Wisconsin", "America/Chicago"),
    us("US-WY", "Wyoming", "America/Denver"),
];

/// Look up a region profile. Codes are matched case-insensitively.
pub fn lookup(code: &str) -> Option<&'static RegionProfile> {
    let code = code.trim();
    REGIONS.iter().find(|r| r.code.eq_ignore_ascii_case(code))
}

/// Resolve a region code. Never fails: unknown codes get the defaults.
pub fn resolve(code: &str) -> RegionSettings {
    match lookup(code) {
        Some(profile) => RegionSettings {
            locale: profile.locale,
            timezone: profile.timezone,
        },
        None => RegionSettings {
            locale: DEFAULT_LOCALE,
            timezone: DEFAULT_TIMEZONE,
        },
    }
}
