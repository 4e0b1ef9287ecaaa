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

//! Configuration file loading against real files.

use boring::config::Config;
use boring::tunnel::{Mode, Status};

fn write_config(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".boring.toml");
    std::fs::write(&path, content).unwrap();
    (dir, path)
}

#[test]
fn full_config_loads() {
    let (_dir, path) = write_config(
        r#"
keep_alive = 60

[[tunnels]]
name = "dev"
local = "localhost:9000"
remote = "localhost:9000"
host = "dev-server"
user = "joe"
identity = "~/.ssh/id_dev"
port = 2222
group = "work"

[[tunnels]]
name = "proxy"
local = 1080
remote = 0
host = "edge"
mode = "socks"
keep_alive = 0
"#,
    );

    let conf = Config::load_from(&path).unwrap();
    assert_eq!(conf.tunnels.len(), 2);

    let dev = &conf.tunnels_map["dev"];
    assert_eq!(dev.user, "joe");
    assert_eq!(dev.port, 2222);
    assert_eq!(dev.keep_alive, Some(60));
    assert_eq!(dev.mode, Mode::Local);
    assert_eq!(dev.group, "work");
    assert_eq!(dev.status, Status::Closed);

    let proxy = &conf.tunnels_map["proxy"];
    assert_eq!(proxy.mode, Mode::Socks);
    assert_eq!(proxy.keep_alive, Some(0));
    assert_eq!(proxy.local_address.as_str(), "1080");
    assert_eq!(proxy.remote_address.as_str(), "[SOCKS]");
}

#[test]
fn missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    let err = Config::load_from(&path).unwrap_err();
    assert!(err.to_string().contains("could not read config file"));
}

#[test]
fn bad_toml_is_reported_as_parse_error() {
    let (_dir, path) = write_config("keep_alive = \"often\"\n");
    let err = Config::load_from(&path).unwrap_err();
    assert!(err.to_string().contains("could not parse config file"));
}

#[test]
fn name_with_glob_char_is_rejected() {
    let (_dir, path) = write_config(
        "[[tunnels]]\nname = \"bad[name\"\nlocal = 1\nremote = 2\nhost = \"h\"\n",
    );
    let err = Config::load_from(&path).unwrap_err();
    assert!(err.to_string().starts_with("tunnel names cannot be empty, "));
}

#[test]
fn unknown_mode_is_rejected() {
    let (_dir, path) = write_config(
        "[[tunnels]]\nname = \"t\"\nlocal = 1\nremote = 2\nhost = \"h\"\nmode = \"sideways\"\n",
    );
    assert!(Config::load_from(&path).is_err());
}
