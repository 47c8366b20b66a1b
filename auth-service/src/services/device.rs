//! User-agent fingerprinting for session continuity.
//!
//! The fingerprint is derived purely from the user-agent string and is
//! trivially spoofable. It decides whether a login continues an existing
//! session or starts a new one; it is never an authentication factor.

use crate::models::{DeviceType, Session};

const UNKNOWN_BROWSER: &str = "Unknown browser";
const UNKNOWN_MOBILE: &str = "Unknown mobile";
const UNKNOWN_TABLET: &str = "Unknown tablet";
const UNKNOWN_OS_PREFIX: &str = "Unknown OS ";

/// Which continuity field differed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeviceConflict {
    #[error("browser mismatch")]
    Browser,
    #[error("OS mismatch")]
    Os,
    #[error("device mismatch")]
    Device,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub device_id: String,
    pub device_type: DeviceType,
    pub device_model: Option<String>,
    pub os: String,
    pub os_version: String,
    pub browser: String,
    pub browser_version: String,
}

impl Fingerprint {
    pub fn parse(user_agent: &str) -> Self {
        let (os, os_version) = detect_os(user_agent);
        let (browser, browser_version) = detect_browser(user_agent);
        let device_type = detect_device_type(user_agent);
        let device_model = detect_model(user_agent);

        let device_id = match device_type {
            DeviceType::Mobile => device_model.clone().unwrap_or_else(|| UNKNOWN_MOBILE.to_string()),
            DeviceType::Tablet => device_model.clone().unwrap_or_else(|| UNKNOWN_TABLET.to_string()),
            DeviceType::Desktop if os.is_empty() => format!("{}{}", UNKNOWN_OS_PREFIX, browser),
            DeviceType::Desktop => format!("{}{}", os, browser),
        };

        Self {
            device_id,
            device_type,
            device_model,
            os,
            os_version,
            browser,
            browser_version,
        }
    }

    /// Compare against a stored session. Browser is checked first, then OS, then device.
    pub fn check_continuity(&self, session: &Session) -> Result<(), DeviceConflict> {
        if self.browser != session.browser {
            return Err(DeviceConflict::Browser);
        }
        if self.os != session.os {
            return Err(DeviceConflict::Os);
        }
        if self.device_id != session.device_id {
            return Err(DeviceConflict::Device);
        }
        Ok(())
    }
}

/// Text following `marker` up to the next space, `;` or `)`.
fn version_after<'a>(ua: &'a str, marker: &str) -> Option<&'a str> {
    let start = ua.find(marker)? + marker.len();
    let rest = &ua[start..];
    let end = rest.find([' ', ';', ')']).unwrap_or(rest.len());
    Some(&rest[..end])
}

fn apple_os_version(ua: &str) -> String {
    ua.find("CPU ")
        .and_then(|i| version_after(&ua[i..], "OS "))
        .map(|v| v.replace('_', "."))
        .unwrap_or_default()
}

fn windows_release(nt: &str) -> String {
    match nt {
        "10.0" => "10",
        "6.3" => "8.1",
        "6.2" => "8",
        "6.1" => "7",
        "6.0" => "Vista",
        "5.1" | "5.2" => "XP",
        other => other,
    }
    .to_string()
}

fn detect_os(ua: &str) -> (String, String) {
    if ua.contains("Windows Phone") {
        let v = version_after(ua, "Windows Phone ").unwrap_or_default();
        return ("Windows Phone".to_string(), v.to_string());
    }
    if let Some(nt) = version_after(ua, "Windows NT ") {
        return ("Windows".to_string(), windows_release(nt));
    }
    if ua.contains("Windows") {
        return ("Windows".to_string(), String::new());
    }
    if ua.contains("CrOS") {
        return ("ChromeOS".to_string(), String::new());
    }
    if ua.contains("iPad") {
        return ("iPadOS".to_string(), apple_os_version(ua));
    }
    if ua.contains("iPhone") || ua.contains("iPod") {
        return ("iOS".to_string(), apple_os_version(ua));
    }
    if ua.contains("Android") {
        let v = version_after(ua, "Android ").unwrap_or_default();
        return ("Android".to_string(), v.to_string());
    }
    if ua.contains("Mac OS X") {
        let v = version_after(ua, "Mac OS X ").unwrap_or_default();
        return ("macOS".to_string(), v.replace('_', "."));
    }
    if ua.contains("Linux") {
        return ("Linux".to_string(), String::new());
    }
    (String::new(), String::new())
}

fn detect_browser(ua: &str) -> (String, String) {
    const MARKERS: [(&str, &str); 10] = [
        ("Edg/", "Edge"),
        ("EdgA/", "Edge"),
        ("EdgiOS/", "Edge"),
        ("OPR/", "Opera"),
        ("YaBrowser/", "Yandex"),
        ("SamsungBrowser/", "Samsung Internet"),
        ("Firefox/", "Firefox"),
        ("FxiOS/", "Firefox"),
        ("CriOS/", "Chrome"),
        ("Chrome/", "Chrome"),
    ];

    for (marker, name) in MARKERS {
        if let Some(v) = version_after(ua, marker) {
            return (name.to_string(), v.to_string());
        }
    }

    if ua.contains("Safari/") {
        if let Some(v) = version_after(ua, "Version/") {
            return ("Safari".to_string(), v.to_string());
        }
    }

    (UNKNOWN_BROWSER.to_string(), String::new())
}

fn detect_device_type(ua: &str) -> DeviceType {
    let android = ua.contains("Android");
    if ua.contains("iPad") || ua.contains("Tablet") || (android && !ua.contains("Mobile")) {
        return DeviceType::Tablet;
    }
    if ua.contains("Mobi")
        || ua.contains("iPhone")
        || ua.contains("iPod")
        || android
        || ua.contains("Windows Phone")
    {
        return DeviceType::Mobile;
    }
    DeviceType::Desktop
}

fn detect_model(ua: &str) -> Option<String> {
    for apple in ["iPad", "iPhone", "iPod"] {
        if ua.contains(apple) {
            return Some(apple.to_string());
        }
    }

    // "(Linux; Android 13; Pixel 7 Build/TQ3A)" -> "Pixel 7"
    let start = ua.find("Android")?;
    let platform = &ua[start..];
    let platform = &platform[..platform.find(')').unwrap_or(platform.len())];

    platform
        .split(';')
        .skip(1)
        .map(|segment| {
            let segment = segment.trim();
            match segment.find(" Build/") {
                Some(i) => segment[..i].trim(),
                None => segment,
            }
        })
        .find(|segment| !is_platform_token(segment))
        .map(str::to_string)
}

/// Segments of an Android platform block that never name the hardware.
fn is_platform_token(segment: &str) -> bool {
    matches!(segment, "" | "K" | "wv" | "U" | "Mobile" | "Tablet" | "Linux")
        || segment.starts_with("rv:")
        || segment.starts_with("Android")
        || is_locale(segment)
}

/// "en-us", "ko-KR"
fn is_locale(segment: &str) -> bool {
    match segment.split_once(['-', '_']) {
        Some((lang, region)) => {
            lang.len() == 2
                && region.len() == 2
                && lang.chars().all(|c| c.is_ascii_lowercase())
                && region.chars().all(|c| c.is_ascii_alphabetic())
        }
        None => false,
    }
}
