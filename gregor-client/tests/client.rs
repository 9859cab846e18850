// Copyright ⓒ 2024-2025 Peter Morgan <peter.james.morgan@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The wire client against a scripted broker on a real socket.

use bytes::Bytes;
use gregor_client::{Api as _, Client, Error};
use gregor_sans_io::{
    ApiVersionsRequest, ApiVersionsResponse, FindCoordinatorRequest, FindCoordinatorResponse,
    Frame, Header, HeartbeatRequest, HeartbeatResponse, MetadataRequest, MetadataResponse,
    Request, Response,
    message::{metadata::MetadataResponseBroker, version::ApiVersion},
};
use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _},
    net::{TcpListener, TcpStream},
};
use url::Url;

async fn read_frame(stream: &mut TcpStream) -> Result<Option<Bytes>, Error> {
    let mut size = [0u8; 4];

    if stream.read_exact(&mut size).await.is_err() {
        return Ok(None);
    }

    let mut buffer = vec![0u8; i32::from_be_bytes(size) as usize + size.len()];
    buffer[0..4].copy_from_slice(&size);
    _ = stream.read_exact(&mut buffer[4..]).await?;

    Ok(Some(Bytes::from(buffer)))
}

/// answer version inquiries, metadata, coordinator lookups and heartbeats
/// for a single node cluster listening on `port`
async fn serve(stream: &mut TcpStream, port: i32) -> Result<(), Error> {
    while let Some(frame) = read_frame(stream).await? {
        let (header, _body) = Frame::request_from_bytes(frame)?;

        let Header::Request {
            api_key,
            api_version,
            correlation_id,
            ..
        } = header
        else {
            return Err(Error::Message("response header".into()));
        };

        let response = match api_key {
            ApiVersionsRequest::KEY => Frame::response(
                correlation_id,
                &ApiVersionsResponse::default()
                    .api_keys([
                        ApiVersion::new(MetadataRequest::KEY, 0, 2),
                        ApiVersion::new(FindCoordinatorRequest::KEY, 0, 0),
                        ApiVersion::new(HeartbeatRequest::KEY, 0, 0),
                        ApiVersion::new(ApiVersionsRequest::KEY, 0, 0),
                    ])
                    .into_value(api_version),
                ApiVersionsResponse::scheme(api_version),
            )?,

            MetadataRequest::KEY => Frame::response(
                correlation_id,
                &MetadataResponse::default()
                    .brokers([MetadataResponseBroker::default()
                        .node_id(1001)
                        .host("127.0.0.1")
                        .port(port)])
                    .cluster_id(Some("abc".into()))
                    .controller_id(1001)
                    .into_value(api_version),
                MetadataResponse::scheme(api_version),
            )?,

            FindCoordinatorRequest::KEY => Frame::response(
                correlation_id,
                &FindCoordinatorResponse::default()
                    .node_id(1001)
                    .host("127.0.0.1")
                    .port(port)
                    .into_value(api_version),
                FindCoordinatorResponse::scheme(api_version),
            )?,

            HeartbeatRequest::KEY => Frame::response(
                correlation_id,
                &HeartbeatResponse::default().into_value(api_version),
                HeartbeatResponse::scheme(api_version),
            )?,

            otherwise => return Err(Error::Message(format!("unexpected api key {otherwise}"))),
        };

        stream.write_all(&response[..]).await?;
    }

    Ok(())
}

#[tokio::test]
async fn coordinator_lookup_over_tcp() -> Result<(), Error> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = i32::from(listener.local_addr()?.port());

    let server = tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };

            _ = tokio::spawn(async move { serve(&mut stream, port).await });
        }
    });

    let broker = Url::parse(&format!("tcp://127.0.0.1:{port}"))?;
    let mut client = Client::connect([broker], Some("test".into())).await?;

    assert!(client.cluster().broker(1001).is_some());

    let coordinator = client.find_coordinator("test-consumer-group").await?;
    assert_eq!(1001, coordinator.node_id);
    assert_eq!(port, coordinator.port);

    client.heartbeat(&coordinator, "test-consumer-group", 1, "m1").await?;

    server.abort();

    Ok(())
}
