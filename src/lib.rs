//! Embeddable lead-capture form.
//!
//! A [`widget::Widget`] is mounted from host attributes, captures marketing
//! attribution for the page it lands on, renders scoped markup and relays
//! the visitor's submission to a lead endpoint before redirecting.

pub mod api;
pub mod attribution;
pub mod automount;
pub mod config;
pub mod embed;
pub mod ip_lookup;
pub mod labels;
pub mod registry;
pub mod render;
pub mod server;
pub mod submission;
pub mod widget;

pub use attribution::{AttributionSnapshot, PageContext, UtmParams};
pub use labels::{LabelCatalog, LabelOverrides, LabelSet};
pub use submission::{LeadFields, LeadSubmission};
pub use widget::{Navigation, SubmitEvent, Widget, WidgetConfig, WidgetServices};
