// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! IPC wire-format tests over a real socket pair.

use std::collections::HashMap;

use boring::ipc::{self, Cmd, CmdKind, Info, Resp};
use boring::tunnel::{Desc, Mode, Status};
use tokio::net::UnixStream;

#[tokio::test]
async fn command_round_trip_over_socket_pair() {
    let (mut client, mut server) = UnixStream::pair().unwrap();

    let mut desc = Desc::named("staging-db");
    desc.local_address = "5432".into();
    desc.remote_address = "db.internal:5432".into();
    desc.host = "bastion".into();
    desc.mode = Mode::Local;

    ipc::write(&Cmd::with_tunnel(CmdKind::Open, desc), &mut client).await.unwrap();
    let got: Cmd = ipc::read(&mut server).await.unwrap();
    assert_eq!(got.kind, CmdKind::Open);
    let tunnel = got.tunnel.unwrap();
    assert_eq!(tunnel.name, "staging-db");
    assert_eq!(tunnel.local_address.as_str(), "5432");
    assert_eq!(tunnel.host, "bastion");
}

#[tokio::test]
async fn response_round_trip_with_status_and_info() {
    let (mut client, mut server) = UnixStream::pair().unwrap();

    let mut desc = Desc::named("staging-db");
    desc.status = Status::Open;
    desc.last_conn = Some(chrono::Utc::now());
    let mut tunnels = HashMap::new();
    tunnels.insert(desc.name.clone(), desc);

    let resp = Resp {
        success: true,
        error: None,
        tunnels: Some(tunnels),
        info: Some(Info { commit: "ab9fe".into() }),
    };
    ipc::write(&resp, &mut server).await.unwrap();

    let got: Resp = ipc::read(&mut client).await.unwrap();
    assert!(got.success);
    assert_eq!(got.info.unwrap().commit, "ab9fe");
    let tunnels = got.tunnels.unwrap();
    assert_eq!(tunnels["staging-db"].status, Status::Open);
    assert!(tunnels["staging-db"].last_conn.is_some());
}

#[tokio::test]
async fn error_response_keeps_message() {
    let (mut client, mut server) = UnixStream::pair().unwrap();

    let resp = Resp {
        success: false,
        error: Some("already running".into()),
        tunnels: None,
        info: Some(Info::default()),
    };
    ipc::write(&resp, &mut server).await.unwrap();
    let got: Resp = ipc::read(&mut client).await.unwrap();
    assert!(!got.success);
    assert!(got.error.unwrap().ends_with("already running"));
}

#[tokio::test]
async fn request_then_response_on_one_connection() {
    // The protocol is one command and one response per connection.
    let (mut client, mut server) = UnixStream::pair().unwrap();

    ipc::write(&Cmd::new(CmdKind::Nop), &mut client).await.unwrap();
    let got: Cmd = ipc::read(&mut server).await.unwrap();
    assert_eq!(got.kind, CmdKind::Nop);

    let resp = Resp { success: true, ..Default::default() };
    ipc::write(&resp, &mut server).await.unwrap();
    let got: Resp = ipc::read(&mut client).await.unwrap();
    assert!(got.success);
}
