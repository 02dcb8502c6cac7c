// SPDX-FileCopyrightText: © 2025 Huawei Cloud Computing Technologies Co., Ltd
// SPDX-License-Identifier: Apache-2.0
//
// Copyright 2025 Huawei Cloud Computing Technologies Co., Ltd
//
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
//

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LoadBalanceRequest {
    #[prost(oneof = "load_balance_request::LoadBalanceRequestType", tags = "1, 2")]
    pub load_balance_request_type: ::core::option::Option<load_balance_request::LoadBalanceRequestType>,
}
/// Nested message and enum types in `LoadBalanceRequest`.
pub mod load_balance_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum LoadBalanceRequestType {
        /// This message should be sent on the first request to the load balancer.
        #[prost(message, tag = "1")]
        InitialRequest(super::InitialLoadBalanceRequest),
        /// The client stats should be periodically reported to the load balancer
        /// based on the duration defined in the InitialLoadBalanceResponse.
        #[prost(message, tag = "2")]
        ClientStats(super::ClientStats),
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InitialLoadBalanceRequest {
    /// Name of load balanced service (for example, service.googleapis.com).
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
}
/// Contains client level statistics that are useful to load balancing. Each
/// count should be reset to zero after reporting the stats.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClientStats {
    /// The total number of requests sent by the client since the last report.
    #[prost(int64, tag = "1")]
    pub total_requests: i64,
    /// The number of client rpc errors since the last report.
    #[prost(int64, tag = "2")]
    pub client_rpc_errors: i64,
    /// The number of dropped requests since the last report.
    #[prost(int64, tag = "3")]
    pub dropped_requests: i64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LoadBalanceResponse {
    #[prost(oneof = "load_balance_response::LoadBalanceResponseType", tags = "1, 2")]
    pub load_balance_response_type: ::core::option::Option<load_balance_response::LoadBalanceResponseType>,
}
/// Nested message and enum types in `LoadBalanceResponse`.
pub mod load_balance_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum LoadBalanceResponseType {
        /// This message should be sent on the first response to the client.
        #[prost(message, tag = "1")]
        InitialResponse(super::InitialLoadBalanceResponse),
        /// Contains the list of servers selected by the load balancer. The client
        /// should send requests to these servers in the specified order.
        #[prost(message, tag = "2")]
        ServerList(super::ServerList),
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InitialLoadBalanceResponse {
    /// This is an application layer redirect that indicates the client should
    /// use the specified server for load balancing. When this field is set in
    /// the response, the client should open a separate connection to the
    /// load_balancer_delegate and call the BalanceLoad method.
    #[prost(string, tag = "1")]
    pub load_balancer_delegate: ::prost::alloc::string::String,
    /// This interval defines how often the client should send the client stats
    /// to the load balancer. Stats should only be reported when the duration is
    /// positive.
    #[prost(message, optional, tag = "2")]
    pub client_stats_report_interval: ::core::option::Option<::prost_types::Duration>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerList {
    /// Contains a list of servers selected by the load balancer. The list will
    /// be updated when server resolutions change or as needed to balance load
    /// across more servers. The client should consume the server list in order
    /// unless instructed otherwise via the client_config.
    #[prost(message, repeated, tag = "1")]
    pub servers: ::prost::alloc::vec::Vec<Server>,
    /// Indicates the amount of time that the client should consider this server
    /// list as valid. It may be considered stale after waiting this interval of
    /// time after receiving the list. If the interval is not positive, the
    /// client can assume the list is valid until the next list is received.
    #[prost(message, optional, tag = "3")]
    pub expiration_interval: ::core::option::Option<::prost_types::Duration>,
}
/// Contains server information. When none of the \[drop_request\] fields are
/// true, use the other fields. When drop_request is true, ignore the other
/// fields.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Server {
    /// A resolved address for the server, serialized in network-byte-order. It
    /// may either be an IPv4 or IPv6 address.
    #[prost(bytes = "vec", tag = "1")]
    pub ip_address: ::prost::alloc::vec::Vec<u8>,
    /// A resolved port number for the server.
    #[prost(int32, tag = "2")]
    pub port: i32,
    /// An opaque but printable token given to the frontend for each pick. All
    /// frontend requests for that pick must include the token in its initial
    /// metadata. The token is used by the backend to verify the request and to
    /// allow the backend to report load to the gRPC LB system.
    #[prost(string, optional, tag = "3")]
    pub load_balance_token: ::core::option::Option<::prost::alloc::string::String>,
    /// Indicates whether this particular request should be dropped by the
    /// client when this server is chosen from the list.
    #[prost(bool, tag = "4")]
    pub drop_request: bool,
}
/// Generated client implementations.
pub mod load_balancer_client {
    #![allow(unused_variables, dead_code, missing_docs, clippy::wildcard_imports, clippy::let_unit_value)]
    use tonic::codegen::http::Uri;
    use tonic::codegen::*;
    #[derive(Debug, Clone)]
    pub struct LoadBalancerClient<T> {
        inner: tonic::client::Grpc<T>,
    }
    impl LoadBalancerClient<tonic::transport::Channel> {
        /// Attempt to create a new client by connecting to a given endpoint.
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }
    impl<T> LoadBalancerClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }
        pub fn with_origin(inner: T, origin: Uri) -> Self {
            let inner = tonic::client::Grpc::with_origin(inner, origin);
            Self { inner }
        }
        /// Bidirectional rpc to get a list of servers.
        pub async fn balance_load(
            &mut self,
            request: impl tonic::IntoStreamingRequest<Message = super::LoadBalanceRequest>,
        ) -> std::result::Result<tonic::Response<tonic::codec::Streaming<super::LoadBalanceResponse>>, tonic::Status>
        {
            self.inner
                .ready()
                .await
                .map_err(|e| tonic::Status::unknown(format!("Service was not ready: {}", e.into())))?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/grpc.lb.v1.LoadBalancer/BalanceLoad");
            let mut req = request.into_streaming_request();
            req.extensions_mut().insert(GrpcMethod::new("grpc.lb.v1.LoadBalancer", "BalanceLoad"));
            self.inner.streaming(req, path, codec).await
        }
    }
}
