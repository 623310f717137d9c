//! Login helpers: redirect classification, credential merging and
//! human-like pointer movement.

use crate::config::{Credentials, LoginMarkers};
use crate::error::StepError;
use crate::renderer::FormSnapshot;
use rand::Rng;
use std::collections::BTreeMap;
use std::time::Duration;

/// What a post-submit URL says about the login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginSignal {
    /// Contains a dashboard marker.
    Success(String),
    /// Contains an error marker.
    Rejected(String),
    /// Neither marker yet.
    Pending,
}

/// Match `url` against the markers, case-insensitively. Error markers win
/// when both are present.
pub fn classify_url(url: &str, markers: &LoginMarkers) -> LoginSignal {
    let url = url.to_lowercase();
    if let Some(m) = markers
        .error
        .iter()
        .find(|m| url.contains(&m.to_lowercase()))
    {
        return LoginSignal::Rejected(m.clone());
    }
    if let Some(m) = markers
        .success
        .iter()
        .find(|m| url.contains(&m.to_lowercase()))
    {
        return LoginSignal::Success(m.clone());
    }
    LoginSignal::Pending
}

/// Every field of `snapshot` with the username and password filled in.
///
/// Field names come from the form itself when it exposes an obvious text and
/// password input, otherwise from the first fallback name the form contains.
/// Hidden fields pass through untouched.
pub fn merge_credentials(
    snapshot: &FormSnapshot,
    credentials: &Credentials,
    username_fallbacks: &[String],
    password_fallbacks: &[String],
) -> Result<BTreeMap<String, String>, StepError> {
    let user_field = snapshot
        .username_field
        .clone()
        .or_else(|| find_field(&snapshot.fields, username_fallbacks))
        .ok_or_else(|| StepError::transient("login form has no username field yet"))?;
    let pass_field = snapshot
        .password_field
        .clone()
        .or_else(|| find_field(&snapshot.fields, password_fallbacks))
        .ok_or_else(|| StepError::transient("login form has no password field yet"))?;

    let mut fields = snapshot.fields.clone();
    fields.insert(user_field, credentials.username.clone());
    fields.insert(pass_field, credentials.password.clone());
    Ok(fields)
}

fn find_field(fields: &BTreeMap<String, String>, candidates: &[String]) -> Option<String> {
    candidates.iter().find_map(|c| {
        fields
            .keys()
            .find(|name| name.eq_ignore_ascii_case(c))
            .cloned()
    })
}

/// A pointer trajectory ending on the click target.
#[derive(Debug, Clone, PartialEq)]
pub struct PointerPlan {
    pub waypoints: Vec<(f64, f64)>,
    /// Pause after each waypoint.
    pub pauses: Vec<Duration>,
    /// Pause between arriving and clicking.
    pub settle: Duration,
}

/// Plan a curved, slightly noisy path from `from` to `to`.
pub fn plan_pointer<R: Rng + ?Sized>(from: (f64, f64), to: (f64, f64), rng: &mut R) -> PointerPlan {
    let steps = rng.gen_range(8..=16);
    let (dx, dy) = (to.0 - from.0, to.1 - from.1);
    let bend = rng.gen_range(-0.25..=0.25);
    // control point offset perpendicular to the straight line
    let control = (
        from.0 + dx * 0.5 - dy * bend,
        from.1 + dy * 0.5 + dx * bend,
    );

    let mut waypoints = Vec::with_capacity(steps);
    let mut pauses = Vec::with_capacity(steps);
    for i in 1..=steps {
        let t = i as f64 / steps as f64;
        let u = 1.0 - t;
        let mut x = u * u * from.0 + 2.0 * u * t * control.0 + t * t * to.0;
        let mut y = u * u * from.1 + 2.0 * u * t * control.1 + t * t * to.1;
        if i < steps {
            x += rng.gen_range(-1.5..=1.5);
            y += rng.gen_range(-1.5..=1.5);
        }
        waypoints.push((x, y));
        pauses.push(Duration::from_millis(rng.gen_range(8..=28)));
    }

    PointerPlan {
        waypoints,
        pauses,
        settle: Duration::from_millis(rng.gen_range(150..=600)),
    }
}
