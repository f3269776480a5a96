//! The out-of-process driver adapter.
//!
//! [`RemoteDriver`] turns every driver operation into one call to a
//! network plugin and reshapes the reply. Operations the plugin protocol
//! has no procedure for return [`NetworkError::NotImplemented`] without
//! contacting the plugin.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use skiff_common::{EndpointId, NetworkId, SkiffError};

use crate::driver::{Driver, JoinInfo, SandboxInfo};
use crate::error::{NetworkError, NetworkResult};
use crate::options::Options;

pub mod api;
pub mod client;

pub use api::CreateEndpointResponse;
pub use client::{HttpPluginClient, PLUGIN_MEDIA_TYPE, PluginClient};

use api::{
    CREATE_ENDPOINT, CREATE_NETWORK, CreateEndpointRequest, CreateNetworkRequest, DELETE_ENDPOINT,
    DeleteEndpointRequest, JOIN, JoinRequest, LEAVE, LeaveRequest,
};

/// Driver that forwards operations to a network plugin.
pub struct RemoteDriver {
    network_type: String,
    client: Arc<dyn PluginClient>,
}

impl std::fmt::Debug for RemoteDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteDriver")
            .field("network_type", &self.network_type)
            .finish_non_exhaustive()
    }
}

impl RemoteDriver {
    /// Create a driver serving `network_type` through `client`.
    pub fn new(network_type: impl Into<String>, client: Arc<dyn PluginClient>) -> Self {
        Self {
            network_type: network_type.into(),
            client,
        }
    }

    async fn call<R: Serialize + Sync>(&self, method: &str, request: &R) -> NetworkResult<Value> {
        let request = serde_json::to_value(request).map_err(SkiffError::from)?;
        tracing::debug!(driver = %self.network_type, method, "Remote driver call");
        self.client.call(method, request).await
    }
}

/// Decode a reply; a reply without a body decodes like an empty object.
fn decode<T: DeserializeOwned>(method: &str, reply: Value) -> NetworkResult<T> {
    let reply = if reply.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        reply
    };
    serde_json::from_value(reply).map_err(|source| NetworkError::Decode {
        method: method.to_string(),
        source,
    })
}

#[async_trait]
impl Driver for RemoteDriver {
    async fn config(&self, _options: &Options) -> NetworkResult<()> {
        Err(NetworkError::not_implemented("config"))
    }

    async fn create_network(&self, id: &NetworkId, options: &Options) -> NetworkResult<()> {
        let request = CreateNetworkRequest {
            id: id.as_str(),
            options,
        };
        self.call(CREATE_NETWORK, &request).await?;
        Ok(())
    }

    async fn delete_network(&self, _id: &NetworkId) -> NetworkResult<()> {
        Err(NetworkError::not_implemented("delete_network"))
    }

    async fn create_endpoint(
        &self,
        network_id: &NetworkId,
        endpoint_id: &EndpointId,
        options: &Options,
    ) -> NetworkResult<SandboxInfo> {
        let request = CreateEndpointRequest {
            network_id: network_id.as_str(),
            id: endpoint_id.as_str(),
            options,
        };
        let reply = self.call(CREATE_ENDPOINT, &request).await?;
        let response: CreateEndpointResponse = decode(CREATE_ENDPOINT, reply)?;
        response.to_sandbox_info()
    }

    async fn delete_endpoint(
        &self,
        network_id: &NetworkId,
        endpoint_id: &EndpointId,
    ) -> NetworkResult<()> {
        let request = DeleteEndpointRequest {
            network_id: network_id.as_str(),
            endpoint_id: endpoint_id.as_str(),
        };
        self.call(DELETE_ENDPOINT, &request).await?;
        Ok(())
    }

    async fn endpoint_info(
        &self,
        _network_id: &NetworkId,
        _endpoint_id: &EndpointId,
    ) -> NetworkResult<Options> {
        Err(NetworkError::not_implemented("endpoint_info"))
    }

    async fn join(
        &self,
        network_id: &NetworkId,
        endpoint_id: &EndpointId,
        sandbox_key: &str,
        options: &Options,
    ) -> NetworkResult<JoinInfo> {
        let request = JoinRequest {
            network_id: network_id.as_str(),
            endpoint_id: endpoint_id.as_str(),
            sandbox_key,
            options,
        };
        let reply = self.call(JOIN, &request).await?;
        decode(JOIN, reply)
    }

    async fn leave(
        &self,
        network_id: &NetworkId,
        endpoint_id: &EndpointId,
        options: &Options,
    ) -> NetworkResult<()> {
        let request = LeaveRequest {
            network_id: network_id.as_str(),
            endpoint_id: endpoint_id.as_str(),
            options,
        };
        self.call(LEAVE, &request).await?;
        Ok(())
    }

    fn network_type(&self) -> &str {
        &self.network_type
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct FakeClient {
        calls: Mutex<Vec<(String, Value)>>,
        replies: HashMap<String, Result<Value, String>>,
    }

    impl FakeClient {
        fn reply(mut self, method: &str, reply: Value) -> Self {
            self.replies.insert(method.to_string(), Ok(reply));
            self
        }

        fn fail(mut self, method: &str, message: &str) -> Self {
            self.replies
                .insert(method.to_string(), Err(message.to_string()));
            self
        }
    }

    #[async_trait]
    impl PluginClient for FakeClient {
        async fn call(&self, method: &str, request: Value) -> NetworkResult<Value> {
            self.calls.lock().push((method.to_string(), request));
            match self.replies.get(method) {
                Some(Ok(reply)) => Ok(reply.clone()),
                Some(Err(message)) => Err(NetworkError::Plugin {
                    method: method.to_string(),
                    message: message.clone(),
                }),
                None => Ok(Value::Null),
            }
        }
    }

    fn driver(client: FakeClient) -> (RemoteDriver, Arc<FakeClient>) {
        let client = Arc::new(client);
        (RemoteDriver::new("weave", client.clone()), client)
    }

    fn ids() -> (NetworkId, EndpointId) {
        (NetworkId::new("net1").unwrap(), EndpointId::new("ep1").unwrap())
    }

    #[tokio::test]
    async fn create_network_passes_options_through() {
        let (driver, client) = driver(FakeClient::default());
        let (nid, _) = ids();
        let options: Options = [("com.example.mtu".to_string(), json!(1450))]
            .into_iter()
            .collect();

        driver.create_network(&nid, &options).await.unwrap();

        let calls = client.calls.lock();
        assert_eq!(calls[0].0, "NetworkDriver.CreateNetwork");
        assert_eq!(
            calls[0].1,
            json!({"Id": "net1", "Options": {"com.example.mtu": 1450}})
        );
    }

    #[tokio::test]
    async fn create_endpoint_decodes_address() {
        let (driver, _) = driver(FakeClient::default().reply(
            CREATE_ENDPOINT,
            json!({
                "Interfaces": [{"SrcName": "veth0", "DstName": "eth0", "Address": "172.17.0.2/16"}],
                "Gateway": "172.17.0.1"
            }),
        ));
        let (nid, eid) = ids();

        let info = driver
            .create_endpoint(&nid, &eid, &Options::new())
            .await
            .unwrap();

        let address = info.interfaces[0].address.unwrap();
        assert_eq!(address.prefix_len(), 16);
        assert_eq!(address.addr().to_string(), "172.17.0.2");
        assert_eq!(info.interfaces[0].address_ipv6, None);
        assert_eq!(info.gateway, Some("172.17.0.1".parse().unwrap()));
    }

    #[tokio::test]
    async fn create_endpoint_rejects_bad_address() {
        let (driver, _) = driver(FakeClient::default().reply(
            CREATE_ENDPOINT,
            json!({"Interfaces": [
                {"SrcName": "veth0", "Address": "172.17.0.2/16"},
                {"SrcName": "veth1", "Address": "not-an-ip"}
            ]}),
        ));
        let (nid, eid) = ids();

        let err = driver
            .create_endpoint(&nid, &eid, &Options::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            NetworkError::InvalidAddress { field: "Address", ref value } if value == "not-an-ip"
        ));
    }

    #[tokio::test]
    async fn create_endpoint_with_wrong_shape_is_decode_error() {
        let (driver, _) =
            driver(FakeClient::default().reply(CREATE_ENDPOINT, json!({"Interfaces": 7})));
        let (nid, eid) = ids();

        let err = driver
            .create_endpoint(&nid, &eid, &Options::new())
            .await
            .unwrap_err();

        assert!(matches!(err, NetworkError::Decode { .. }));
    }

    #[tokio::test]
    async fn delete_endpoint_request() {
        let (driver, client) = driver(FakeClient::default());
        let (nid, eid) = ids();

        driver.delete_endpoint(&nid, &eid).await.unwrap();

        let calls = client.calls.lock();
        assert_eq!(calls[0].0, "NetworkDriver.DeleteEndpoint");
        assert_eq!(calls[0].1, json!({"NetworkId": "net1", "EndpointId": "ep1"}));
    }

    #[tokio::test]
    async fn join_decodes_reply() {
        let (driver, client) = driver(FakeClient::default().reply(
            JOIN,
            json!({
                "InterfaceNames": [{"SrcName": "veth0", "DstName": "eth"}],
                "Gateway": "10.0.0.1",
                "HostsPath": "/etc/hosts"
            }),
        ));
        let (nid, eid) = ids();

        let info = driver
            .join(&nid, &eid, "/var/run/netns/c1", &Options::new())
            .await
            .unwrap();

        assert_eq!(info.interface_names[0].dst_name, "eth");
        assert_eq!(info.gateway, "10.0.0.1");
        assert_eq!(info.hosts_path, "/etc/hosts");
        assert_eq!(info.gateway_ipv6, "");
        assert_eq!(client.calls.lock()[0].1["SandboxKey"], "/var/run/netns/c1");
    }

    #[tokio::test]
    async fn leave_request() {
        let (driver, client) = driver(FakeClient::default());
        let (nid, eid) = ids();

        driver.leave(&nid, &eid, &Options::new()).await.unwrap();

        let calls = client.calls.lock();
        assert_eq!(calls[0].0, "NetworkDriver.Leave");
        assert_eq!(
            calls[0].1,
            json!({"NetworkId": "net1", "EndpointId": "ep1", "Options": {}})
        );
    }

    #[tokio::test]
    async fn unsupported_operations_make_no_calls() {
        let (driver, client) = driver(FakeClient::default());
        let (nid, eid) = ids();

        assert!(matches!(
            driver.config(&Options::new()).await,
            Err(NetworkError::NotImplemented { operation: "config" })
        ));
        assert!(matches!(
            driver.delete_network(&nid).await,
            Err(NetworkError::NotImplemented { .. })
        ));
        assert!(matches!(
            driver.endpoint_info(&nid, &eid).await,
            Err(NetworkError::NotImplemented { .. })
        ));
        assert_eq!(driver.network_type(), "weave");
        assert!(client.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn client_errors_propagate() {
        let (driver, client) = driver(FakeClient::default().fail(LEAVE, "endpoint busy"));
        let (nid, eid) = ids();

        let err = driver.leave(&nid, &eid, &Options::new()).await.unwrap_err();

        assert_eq!(
            err.to_string(),
            "Plugin error from NetworkDriver.Leave: endpoint busy"
        );
        assert_eq!(client.calls.lock().len(), 1);
    }
}
