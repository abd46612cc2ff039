use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Published once per state transition.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub name: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub object_link: String,
    pub previous_state: String,
    pub current_state: String,
    #[serde(default)]
    pub error_message: String,
    #[serde(rename = "imageURLs", default)]
    pub image_urls: Vec<String>,
}
