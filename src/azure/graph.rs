use reqwest::blocking::Response;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{NotFound, SyncError, SyncResult};
use crate::sync::Directory;
use crate::ui::prelude::*;
use crate::users::{DIRECTORY_FIELDS, DirectoryUser};

use super::AzureSession;

const SERVICE: &str = "Microsoft Graph";
const API_VERSION: &str = "v1.0";
const USER_TYPE: &str = "#microsoft.graph.user";

/// `OData` error response from Microsoft Graph.
#[derive(Debug, Deserialize)]
struct ODataError {
    error: ODataErrorBody,
}

#[derive(Debug, Deserialize)]
struct ODataErrorBody {
    code: String,
    message: String,
}

/// One page of a collection response.
#[derive(Debug, Deserialize)]
struct ODataPage {
    #[serde(default)]
    value: Vec<Value>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

/// Directory client for Microsoft Graph.
pub struct GraphDirectory<'a> {
    session: &'a AzureSession,
    token: String,
}

impl<'a> GraphDirectory<'a> {
    pub fn connect(session: &'a AzureSession) -> SyncResult<Self> {
        let token = session.access_token(&session.cloud().graph_scope(), SERVICE)?;
        Ok(Self { session, token })
    }

    fn base_url(&self) -> String {
        format!("{}/{}", self.session.cloud().graph_endpoint(), API_VERSION)
    }

    fn fetch_page(&self, url: &str, select: Option<&str>) -> SyncResult<ODataPage> {
        emit(Level::Debug, "graph.request", &format!("GET {url}"), None);
        let mut request = self.session.http().get(url).bearer_auth(&self.token);
        if let Some(select) = select {
            request = request.query(&[("$select", select)]);
        }

        let response = request
            .send()
            .map_err(|e| SyncError::upstream(SERVICE, format!("request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(SyncError::upstream(SERVICE, graph_error_message(response)));
        }
        response
            .json()
            .map_err(|e| SyncError::upstream(SERVICE, format!("invalid response: {e}")))
    }
}

impl Directory for GraphDirectory<'_> {
    fn group_members(
        &self,
        group_id: &str,
        extra_fields: &[String],
    ) -> SyncResult<Vec<DirectoryUser>> {
        emit(
            Level::Debug,
            "graph.group_members",
            &format!("Retrieve group members for directory group {group_id}"),
            None,
        );

        let select = select_clause(extra_fields);
        let mut url = format!("{}/groups/{group_id}/members", self.base_url());
        let mut select_param = Some(select.as_str());
        let mut raw = Vec::new();

        loop {
            let page = self.fetch_page(&url, select_param)?;
            raw.extend(page.value);
            match page.next_link {
                // nextLink already carries the query
                Some(next) => {
                    url = next;
                    select_param = None;
                }
                None => break,
            }
        }

        let members = enabled_users(group_id, raw);
        if members.is_empty() {
            return Err(NotFound::EmptyGroup(group_id.to_string()).into());
        }
        Ok(members)
    }
}

/// The `$select` value: the fixed fields plus any extra requested ones.
fn select_clause(extra_fields: &[String]) -> String {
    let mut fields: Vec<&str> = DIRECTORY_FIELDS.to_vec();
    for field in extra_fields {
        if !fields.contains(&field.as_str()) {
            fields.push(field);
        }
    }
    fields.join(",")
}

/// Keep enabled user objects, without the `@odata.type` marker.
fn enabled_users(group_id: &str, raw: Vec<Value>) -> Vec<DirectoryUser> {
    raw.into_iter()
        .filter_map(|mut value| {
            let object = value.as_object_mut()?;
            if let Some(kind) = object.remove("@odata.type")
                && kind.as_str() != Some(USER_TYPE)
            {
                return None;
            }
            match serde_json::from_value::<DirectoryUser>(value) {
                Ok(user) => Some(user),
                Err(e) => {
                    emit(
                        Level::Warn,
                        "graph.member_invalid",
                        &format!("Ignoring malformed member of group {group_id}: {e}"),
                        None,
                    );
                    None
                }
            }
        })
        .filter(|user| user.account_enabled)
        .collect()
}

fn graph_error_message(response: Response) -> String {
    let status = response.status();
    let body = response.text().unwrap_or_default();
    match serde_json::from_str::<ODataError>(&body) {
        Ok(err) => format!("HTTP {status}: {} - {}", err.error.code, err.error.message),
        Err(_) => format!("HTTP {status}: {body}"),
    }
}
