use clap::ValueEnum;
use serde::Deserialize;

/// National cloud the tenant lives in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloudEnvironment {
    #[default]
    Global,
    UsGov,
    China,
}

impl CloudEnvironment {
    pub fn login_endpoint(self) -> &'static str {
        match self {
            CloudEnvironment::Global => "https://login.microsoftonline.com",
            CloudEnvironment::UsGov => "https://login.microsoftonline.us",
            CloudEnvironment::China => "https://login.chinacloudapi.cn",
        }
    }

    pub fn graph_endpoint(self) -> &'static str {
        match self {
            CloudEnvironment::Global => "https://graph.microsoft.com",
            CloudEnvironment::UsGov => "https://graph.microsoft.us",
            CloudEnvironment::China => "https://microsoftgraph.chinacloudapi.cn",
        }
    }

    pub fn blob_endpoint_suffix(self) -> &'static str {
        match self {
            CloudEnvironment::Global => "blob.core.windows.net",
            CloudEnvironment::UsGov => "blob.core.usgovcloudapi.net",
            CloudEnvironment::China => "blob.core.chinacloudapi.cn",
        }
    }

    pub fn graph_scope(self) -> String {
        format!("{}/.default", self.graph_endpoint())
    }

    /// The storage resource id is the same in every cloud.
    pub fn storage_scope(self) -> &'static str {
        "https://storage.azure.com/.default"
    }
}
