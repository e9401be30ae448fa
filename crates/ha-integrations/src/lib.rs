//! Config-entry based integrations
//!
//! - [`airvisual_pro`]: credential onboarding flow for AirVisual Pro air
//!   quality monitors (user, import and re-authentication paths)
//! - [`nzbget`]: NZBGet download client setup/unload, entry migration and
//!   the `pause`/`resume`/`set_speed` services

pub mod airvisual_pro;
pub mod nzbget;
