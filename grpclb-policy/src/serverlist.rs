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

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use grpclb_api::grpc_lb_v1::{Server, ServerList};
use tonic::metadata::AsciiMetadataValue;
use tracing::{info, warn};

/// Metadata key under which the per-backend LB token travels.
pub const LB_TOKEN_METADATA_KEY: &str = "lb-token";

/// Longest token the balancer may attach to a backend.
pub const LB_TOKEN_MAX_LEN: usize = 50;

/// One backend extracted from a serverlist: where to connect, and the token
/// to echo back as call metadata for usage accounting. The token is always
/// present; a backend the balancer left untagged carries the empty sentinel.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendEndpoint {
    pub address: SocketAddr,
    pub token: AsciiMetadataValue,
}

impl BackendEndpoint {
    pub fn empty_token() -> AsciiMetadataValue {
        AsciiMetadataValue::from_static("")
    }
}

/// Extracts the usable backends from `list`, preserving order. Entries with
/// an invalid port or address length are diagnosed and skipped. An empty
/// result means no child policy can be built from this list.
pub fn decode(list: &ServerList) -> Vec<BackendEndpoint> {
    list.servers.iter().enumerate().filter_map(|(idx, server)| decode_server(server, idx)).collect()
}

fn decode_server(server: &Server, idx: usize) -> Option<BackendEndpoint> {
    if server.port >> 16 != 0 {
        warn!("invalid port '{}' at index {idx} of serverlist, ignoring entry", server.port);
        return None;
    }
    let ip = match server.ip_address.len() {
        4 => {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&server.ip_address);
            IpAddr::V4(Ipv4Addr::from(octets))
        },
        16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&server.ip_address);
            IpAddr::V6(Ipv6Addr::from(octets))
        },
        other => {
            warn!("expected IP address of 4 or 16 bytes, got {other} at index {idx} of serverlist, ignoring entry");
            return None;
        },
    };
    let address = SocketAddr::new(ip, server.port as u16);
    let token = match server.load_balance_token.as_deref() {
        Some(raw) if raw.len() > LB_TOKEN_MAX_LEN => {
            warn!("LB token for backend '{address}' exceeds {LB_TOKEN_MAX_LEN} bytes, using the empty token");
            BackendEndpoint::empty_token()
        },
        Some(raw) => match AsciiMetadataValue::try_from(raw) {
            Ok(token) => token,
            Err(_) => {
                warn!("LB token for backend '{address}' is not valid metadata, using the empty token");
                BackendEndpoint::empty_token()
            },
        },
        None => {
            info!("missing LB token for backend '{address}', the empty token will be used");
            BackendEndpoint::empty_token()
        },
    };
    Some(BackendEndpoint { address, token })
}

/// Serverlist identity for dedup purposes: element-wise over (address, port,
/// token). Drop flags and expiration do not participate.
pub fn serverlists_equal(a: &ServerList, b: &ServerList) -> bool {
    a.servers.len() == b.servers.len()
        && a.servers.iter().zip(&b.servers).all(|(x, y)| {
            x.ip_address == y.ip_address && x.port == y.port && x.load_balance_token == y.load_balance_token
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(ip: &[u8], port: i32, token: Option<&str>) -> Server {
        Server {
            ip_address: ip.to_vec(),
            port,
            load_balance_token: token.map(str::to_owned),
            drop_request: false,
        }
    }

    fn list(servers: Vec<Server>) -> ServerList {
        ServerList { servers, expiration_interval: None }
    }

    #[test]
    fn decodes_ipv4_and_ipv6_entries() {
        let backends = decode(&list(vec![
            server(&[10, 0, 0, 1], 80, Some("tok-a")),
            server(&[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1], 443, Some("tok-b")),
        ]));
        assert_eq!(backends.len(), 2);
        assert_eq!(backends[0].address, "10.0.0.1:80".parse::<SocketAddr>().unwrap());
        assert_eq!(backends[0].token.as_bytes(), b"tok-a");
        assert_eq!(backends[1].address, "[::1]:443".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn rejects_out_of_range_ports() {
        assert!(decode(&list(vec![server(&[10, 0, 0, 1], 70_000, None)])).is_empty());
        assert!(decode(&list(vec![server(&[10, 0, 0, 1], -1, None)])).is_empty());
    }

    #[test]
    fn rejects_malformed_addresses_but_keeps_valid_ones() {
        let backends = decode(&list(vec![
            server(&[10, 0, 0], 80, Some("bad")),
            server(&[10, 0, 0, 2], 80, Some("good")),
        ]));
        assert_eq!(backends.len(), 1);
        assert_eq!(backends[0].token.as_bytes(), b"good");
    }

    #[test]
    fn missing_or_unusable_tokens_become_the_empty_sentinel() {
        let oversized = "t".repeat(LB_TOKEN_MAX_LEN + 1);
        let backends = decode(&list(vec![
            server(&[10, 0, 0, 1], 80, None),
            server(&[10, 0, 0, 2], 80, Some(oversized.as_str())),
            server(&[10, 0, 0, 3], 80, Some("tok-\u{7f}")),
        ]));
        assert_eq!(backends.len(), 3);
        assert!(backends.iter().all(|backend| backend.token.as_bytes().is_empty()));
    }

    #[test]
    fn equality_ignores_the_drop_flag() {
        let a = list(vec![server(&[10, 0, 0, 1], 80, Some("tok"))]);
        let mut b = list(vec![server(&[10, 0, 0, 1], 80, Some("tok"))]);
        b.servers[0].drop_request = true;
        assert!(serverlists_equal(&a, &b));

        let c = list(vec![server(&[10, 0, 0, 1], 81, Some("tok"))]);
        assert!(!serverlists_equal(&a, &c));
        let d = list(vec![server(&[10, 0, 0, 1], 80, Some("other"))]);
        assert!(!serverlists_equal(&a, &d));
    }
}
