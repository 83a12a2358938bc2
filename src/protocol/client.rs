use crate::config::ClientConfig;
use crate::protocol::dto::{
    ActiveTask, ActiveTaskState, HostInfo, ProjectInfo, ResultInfo, ResultState, SimpleGuiInfo,
};
use chrono::{DateTime, Utc};
use log::debug;
use md5::{Digest, Md5};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;

/// Terminates every request and reply on the GUI RPC socket.
const END_CHAR: u8 = 0x03;
pub const DEFAULT_PORT: u16 = 31416;
const RPC_TIMEOUT: Duration = Duration::from_secs(10);
/// Upper bound for a single reply, terminator included.
const MAX_REPLY_SIZE: u64 = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("daemon replied with error: {0}")]
    Response(String),
    #[error("rpc to {0} timed out")]
    Timeout(String),
    #[error("connection closed before end of reply")]
    ConnectionClosed,
    #[error("reply exceeds {0} bytes")]
    ReplyTooLarge(u64),
    #[error("reply is missing <{0}>")]
    MissingElement(&'static str),
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Xml(#[from] quick_xml::DeError),
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
}

pub(crate) fn build_request(method: &str, params: &[(&str, &str)]) -> Vec<u8> {
    let body = if params.is_empty() {
        format!("<{method}/>")
    } else {
        let params: String = params
            .iter()
            .map(|(name, value)| {
                format!("<{name}>{}</{name}>", quick_xml::escape::escape(*value))
            })
            .collect();
        format!("<{method}>{params}</{method}>")
    };
    let mut request =
        format!("<boinc_gui_rpc_request>{body}</boinc_gui_rpc_request>").into_bytes();
    request.push(END_CHAR);
    request
}

pub(crate) fn password_hash(nonce: &str, password: &str) -> String {
    hex::encode(Md5::digest(format!("{nonce}{password}").as_bytes()))
}

#[derive(Deserialize, Debug)]
struct Marker {}

/// Union of all reply bodies this client understands.
#[derive(Deserialize, Debug)]
struct Reply {
    unauthorized: Option<Marker>,
    error: Option<String>,
    nonce: Option<String>,
    authorized: Option<Marker>,
    simple_gui_info: Option<RawSimpleGuiInfo>,
}

#[derive(Deserialize, Debug, Default)]
struct RawSimpleGuiInfo {
    #[serde(rename = "project", default)]
    projects: Vec<RawProject>,
    #[serde(rename = "result", default)]
    results: Vec<RawResult>,
}

#[derive(Deserialize, Debug)]
struct RawProject {
    project_name: String,
    master_url: String,
    #[serde(default)]
    user_name: String,
    team_name: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawResult {
    name: String,
    wu_name: String,
    #[serde(default)]
    platform: String,
    project_url: String,
    final_cpu_time: f64,
    final_elapsed_time: f64,
    estimated_cpu_time_remaining: f64,
    state: i64,
    received_time: f64,
    report_deadline: f64,
    active_task: Option<RawActiveTask>,
}

#[derive(Deserialize, Debug)]
struct RawActiveTask {
    active_task_state: i64,
    fraction_done: f64,
    elapsed_time: f64,
}

fn parse_reply(data: &str) -> Result<Reply, RpcError> {
    let reply: Reply = quick_xml::de::from_str(data)?;
    if reply.unauthorized.is_some() {
        return Err(RpcError::Unauthorized);
    }
    if let Some(message) = reply.error {
        return Err(RpcError::Response(message));
    }
    Ok(reply)
}

/// Read one reply up to the terminator, reading at most `limit` bytes.
async fn read_reply<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    limit: u64,
) -> Result<String, RpcError> {
    let mut data = Vec::new();
    reader.take(limit).read_until(END_CHAR, &mut data).await?;
    if data.last() != Some(&END_CHAR) {
        if data.len() as u64 >= limit {
            return Err(RpcError::ReplyTooLarge(limit));
        }
        return Err(RpcError::ConnectionClosed);
    }
    data.pop();
    Ok(String::from_utf8(data)?)
}

fn timestamp(field: &'static str, seconds: f64) -> Result<DateTime<Utc>, RpcError> {
    DateTime::from_timestamp_millis((seconds * 1000.0) as i64).ok_or(RpcError::InvalidValue {
        field,
        value: seconds.to_string(),
    })
}

impl From<RawProject> for ProjectInfo {
    fn from(raw: RawProject) -> Self {
        Self {
            project_name: raw.project_name,
            master_url: raw.master_url,
            user_name: raw.user_name,
            team_name: raw.team_name.filter(|team| !team.is_empty()),
        }
    }
}

impl TryFrom<RawActiveTask> for ActiveTask {
    type Error = RpcError;

    fn try_from(raw: RawActiveTask) -> Result<Self, Self::Error> {
        let active_task_state =
            ActiveTaskState::try_from(raw.active_task_state).map_err(|code| {
                RpcError::InvalidValue {
                    field: "active_task_state",
                    value: code.to_string(),
                }
            })?;
        Ok(Self {
            active_task_state,
            fraction_done: raw.fraction_done,
            elapsed_time: raw.elapsed_time,
        })
    }
}

impl TryFrom<RawResult> for ResultInfo {
    type Error = RpcError;

    fn try_from(raw: RawResult) -> Result<Self, Self::Error> {
        let state = ResultState::try_from(raw.state).map_err(|code| RpcError::InvalidValue {
            field: "state",
            value: code.to_string(),
        })?;
        Ok(Self {
            name: raw.name,
            wu_name: raw.wu_name,
            platform: raw.platform,
            project_url: raw.project_url,
            final_cpu_time: raw.final_cpu_time,
            final_elapsed_time: raw.final_elapsed_time,
            estimated_cpu_time_remaining: raw.estimated_cpu_time_remaining,
            state,
            received_time: timestamp("received_time", raw.received_time)?,
            report_deadline: timestamp("report_deadline", raw.report_deadline)?,
            active_task: raw.active_task.map(ActiveTask::try_from).transpose()?,
        })
    }
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn open(host: &str, port: u16) -> Result<Self, RpcError> {
        let stream = TcpStream::connect((host, port)).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    async fn send_request(
        &mut self,
        method: &str,
        params: &[(&str, &str)],
    ) -> Result<(), RpcError> {
        self.writer.write_all(&build_request(method, params)).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn read_response(&mut self) -> Result<Reply, RpcError> {
        let data = read_reply(&mut self.reader, MAX_REPLY_SIZE).await?;
        parse_reply(&data)
    }
}

/// Client for the GUI RPC socket of a BOINC core client.
#[derive(Debug, Clone)]
pub struct BoincClient {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub name: Option<String>,
}

impl BoincClient {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            password: None,
            name: None,
        }
    }

    /// The name the host is reported under: the configured name or else the address.
    pub fn host_info(&self) -> HostInfo {
        HostInfo::new(self.name.as_deref().unwrap_or(&self.host))
    }

    async fn authorize(&self, connection: &mut Connection, password: &str) -> Result<(), RpcError> {
        connection.send_request("auth1", &[]).await?;
        let nonce = connection
            .read_response()
            .await?
            .nonce
            .ok_or(RpcError::MissingElement("nonce"))?;

        let nonce_hash = password_hash(&nonce, password);
        connection
            .send_request("auth2", &[("nonce_hash", &nonce_hash)])
            .await?;
        match connection.read_response().await?.authorized {
            Some(_) => Ok(()),
            None => Err(RpcError::Unauthorized),
        }
    }

    async fn call(&self, method: &str, params: &[(&str, &str)]) -> Result<Reply, RpcError> {
        let mut connection = Connection::open(&self.host, self.port).await?;
        if let Some(password) = &self.password {
            self.authorize(&mut connection, password).await?;
        }
        connection.send_request(method, params).await?;
        connection.read_response().await
    }

    async fn call_method(&self, method: &str, params: &[(&str, &str)]) -> Result<Reply, RpcError> {
        debug!("calling {} on {}:{}", method, self.host, self.port);
        timeout(RPC_TIMEOUT, self.call(method, params))
            .await
            .map_err(|_| RpcError::Timeout(format!("{}:{}", self.host, self.port)))?
    }

    pub async fn simple_gui_info(&self) -> Result<SimpleGuiInfo, RpcError> {
        let info = self
            .call_method("get_simple_gui_info", &[])
            .await?
            .simple_gui_info
            .ok_or(RpcError::MissingElement("simple_gui_info"))?;

        let results = info
            .results
            .into_iter()
            .map(ResultInfo::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SimpleGuiInfo {
            host: self.host_info(),
            projects: info.projects.into_iter().map(ProjectInfo::from).collect(),
            results,
        })
    }
}

impl From<ClientConfig> for BoincClient {
    fn from(config: ClientConfig) -> Self {
        Self {
            host: config.host,
            port: config.port,
            password: config.password,
            name: config.name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    const SIMPLE_GUI_INFO: &str = r#"<boinc_gui_rpc_reply>
<simple_gui_info>
<project>
    <master_url>https://einsteinathome.org/</master_url>
    <project_name>Einstein@Home</project_name>
    <user_name>alice</user_name>
</project>
<result>
    <name>h1_0001_0</name>
    <wu_name>h1_0001</wu_name>
    <platform>x86_64-pc-linux-gnu</platform>
    <project_url>https://einsteinathome.org/</project_url>
    <final_cpu_time>0.000000</final_cpu_time>
    <final_elapsed_time>0.000000</final_elapsed_time>
    <estimated_cpu_time_remaining>1234.500000</estimated_cpu_time_remaining>
    <state>2</state>
    <received_time>1700000000.500000</received_time>
    <report_deadline>1701000000.000000</report_deadline>
    <active_task>
        <active_task_state>1</active_task_state>
        <fraction_done>0.250000</fraction_done>
        <elapsed_time>120.000000</elapsed_time>
    </active_task>
</result>
<result>
    <name>h1_0002_0</name>
    <wu_name>h1_0002</wu_name>
    <platform>x86_64-pc-linux-gnu</platform>
    <project_url>https://einsteinathome.org/</project_url>
    <final_cpu_time>0.000000</final_cpu_time>
    <final_elapsed_time>0.000000</final_elapsed_time>
    <estimated_cpu_time_remaining>5000.000000</estimated_cpu_time_remaining>
    <state>1</state>
    <received_time>1700000100.000000</received_time>
    <report_deadline>1701000100.000000</report_deadline>
</result>
</simple_gui_info>
</boinc_gui_rpc_reply>"#;

    /// Serve a single connection, answering each request with the next reply.
    /// Resolves to the requests received.
    async fn fake_daemon(replies: &[&str]) -> (u16, JoinHandle<Vec<String>>) {
        let replies: Vec<String> = replies.iter().map(|reply| reply.to_string()).collect();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut reader = BufReader::new(reader);
            let mut requests = Vec::new();
            for reply in replies {
                let mut request = Vec::new();
                reader.read_until(END_CHAR, &mut request).await.unwrap();
                request.pop();
                requests.push(String::from_utf8(request).unwrap());

                let mut reply = reply.as_bytes().to_vec();
                reply.push(END_CHAR);
                writer.write_all(&reply).await.unwrap();
            }
            requests
        });
        (port, handle)
    }

    fn client(port: u16) -> BoincClient {
        BoincClient {
            port,
            ..BoincClient::new("127.0.0.1")
        }
    }

    #[test]
    fn test_build_request_without_params() {
        assert_eq!(
            build_request("get_simple_gui_info", &[]),
            b"<boinc_gui_rpc_request><get_simple_gui_info/></boinc_gui_rpc_request>\x03"
        );
    }

    #[test]
    fn test_build_request_escapes_params() {
        assert_eq!(
            build_request("auth2", &[("nonce_hash", "a<b&c")]),
            b"<boinc_gui_rpc_request><auth2>\
              <nonce_hash>a&lt;b&amp;c</nonce_hash>\
              </auth2></boinc_gui_rpc_request>\x03"
        );
    }

    #[test]
    fn test_password_hash_is_md5_hex() {
        let hash = password_hash("1234.5", "secret");
        assert_eq!(hash.len(), 32);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(hash, password_hash("1234.6", "secret"));
    }

    #[test]
    fn test_parse_reply_errors() {
        assert!(matches!(
            parse_reply("<boinc_gui_rpc_reply><unauthorized/></boinc_gui_rpc_reply>"),
            Err(RpcError::Unauthorized)
        ));
        let reply = "<boinc_gui_rpc_reply><error>missing nonce</error></boinc_gui_rpc_reply>";
        match parse_reply(reply) {
            Err(RpcError::Response(message)) => assert_eq!(message, "missing nonce"),
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_reply_stops_at_terminator() {
        let mut reader: &[u8] = b"<a/>\x03<b/>\x03";
        assert_eq!(read_reply(&mut reader, 64).await.unwrap(), "<a/>");
        assert_eq!(read_reply(&mut reader, 64).await.unwrap(), "<b/>");
        assert!(matches!(
            read_reply(&mut reader, 64).await,
            Err(RpcError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_read_reply_is_bounded() {
        let mut oversized = vec![b'x'; 100];
        oversized.push(END_CHAR);
        let mut reader: &[u8] = &oversized;

        let result = read_reply(&mut reader, 64).await;
        assert!(matches!(result, Err(RpcError::ReplyTooLarge(64))));

        let mut reader: &[u8] = &oversized;
        assert_eq!(read_reply(&mut reader, 101).await.unwrap().len(), 100);
    }

    #[test]
    fn test_host_info_prefers_name() {
        let mut client = BoincClient::new("10.0.0.5");
        assert_eq!(client.host_info().name, "10.0.0.5");
        client.name = Some("cruncher".to_string());
        assert_eq!(client.host_info().name, "cruncher");
    }

    #[tokio::test]
    async fn test_simple_gui_info() {
        let (port, daemon) = fake_daemon(&[SIMPLE_GUI_INFO]).await;

        let info = client(port).simple_gui_info().await.unwrap();

        let requests = daemon.await.unwrap();
        assert_eq!(
            requests,
            vec!["<boinc_gui_rpc_request><get_simple_gui_info/></boinc_gui_rpc_request>"]
        );

        assert_eq!(info.host.name, "127.0.0.1");
        assert_eq!(info.projects.len(), 1);
        assert_eq!(info.projects[0].project_name, "Einstein@Home");
        assert_eq!(info.projects[0].team_name, None);

        assert_eq!(info.results.len(), 2);
        let running = &info.results[0];
        assert_eq!(running.name, "h1_0001_0");
        assert_eq!(running.state, ResultState::FilesDownloaded);
        assert_eq!(running.received_time.timestamp_millis(), 1_700_000_000_500);
        let task = running.active_task.as_ref().unwrap();
        assert_eq!(task.active_task_state, ActiveTaskState::Executing);
        assert_eq!(task.fraction_done, 0.25);
        assert_eq!(task.elapsed_time, 120.0);

        let queued = &info.results[1];
        assert_eq!(queued.state, ResultState::FilesDownloading);
        assert!(queued.active_task.is_none());
    }

    #[tokio::test]
    async fn test_authorized_call() {
        let (port, daemon) = fake_daemon(&[
            "<boinc_gui_rpc_reply><nonce>1700000000.123456</nonce></boinc_gui_rpc_reply>",
            "<boinc_gui_rpc_reply><authorized/></boinc_gui_rpc_reply>",
            "<boinc_gui_rpc_reply><simple_gui_info></simple_gui_info></boinc_gui_rpc_reply>",
        ])
        .await;
        let mut client = client(port);
        client.password = Some("secret".to_string());

        let info = client.simple_gui_info().await.unwrap();
        assert!(info.results.is_empty());

        let requests = daemon.await.unwrap();
        assert_eq!(requests[0], "<boinc_gui_rpc_request><auth1/></boinc_gui_rpc_request>");
        assert_eq!(
            requests[1],
            format!(
                "<boinc_gui_rpc_request><auth2><nonce_hash>{}</nonce_hash></auth2>\
                 </boinc_gui_rpc_request>",
                password_hash("1700000000.123456", "secret")
            )
        );
    }

    #[tokio::test]
    async fn test_rejected_password() {
        let (port, _daemon) = fake_daemon(&[
            "<boinc_gui_rpc_reply><nonce>42</nonce></boinc_gui_rpc_reply>",
            "<boinc_gui_rpc_reply><unauthorized/></boinc_gui_rpc_reply>",
        ])
        .await;
        let mut client = client(port);
        client.password = Some("wrong".to_string());

        let result = client.simple_gui_info().await;
        assert!(matches!(result, Err(RpcError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_unknown_task_state() {
        let reply = SIMPLE_GUI_INFO.replace(
            "<active_task_state>1</active_task_state>",
            "<active_task_state>42</active_task_state>",
        );
        let (port, _daemon) = fake_daemon(&[&reply]).await;

        let result = client(port).simple_gui_info().await;
        assert!(matches!(
            result,
            Err(RpcError::InvalidValue {
                field: "active_task_state",
                ..
            })
        ));
    }
}
