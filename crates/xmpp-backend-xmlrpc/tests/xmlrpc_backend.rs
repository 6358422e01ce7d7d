use std::time::Duration;

use chrono::{FixedOffset, NaiveDate, TimeZone};
use wiremock::matchers::{body_string_contains, method};
use wiremock::{Mock, MockServer, ResponseTemplate};
use xmpp_backend_core::{
    ApiVersion, ConnectionType, IntoUtc, Stat, XmppBackend, XmppBackendError,
};
use xmpp_backend_xmlrpc::{EjabberdXmlRpcBackend, XmlRpcConfig, XmlRpcCredentials};

fn response(value: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_string(format!(
        "<?xml version=\"1.0\"?><methodResponse><params><param><value>{}</value></param>\
         </params></methodResponse>",
        value
    ))
}

fn fault(code: i64, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_string(format!(
        "<?xml version=\"1.0\"?><methodResponse><fault><value><struct>\
         <member><name>faultCode</name><value><int>{}</int></value></member>\
         <member><name>faultString</name><value><string>{}</string></value></member>\
         </struct></value></fault></methodResponse>",
        code, message
    ))
}

fn res(code: i64) -> ResponseTemplate {
    response(&format!(
        "<struct><member><name>res</name><value><int>{}</int></value></member></struct>",
        code
    ))
}

fn call(name: &str) -> wiremock::MockBuilder {
    Mock::given(method("POST")).and(body_string_contains(format!(
        "<methodName>{}</methodName>",
        name
    )))
}

fn member(name: &str, value: &str) -> String {
    format!(
        "<value><struct><member><name>{}</name><value>{}</value></member></struct></value>",
        name, value
    )
}

fn session_entry(wrapper: &str, fields: &[(&str, &str)]) -> String {
    let fields: String = fields.iter().map(|(name, value)| member(name, value)).collect();
    member(wrapper, &format!("<array><data>{}</data></array>", fields))
}

async fn setup(version: &str) -> (MockServer, EjabberdXmlRpcBackend) {
    let server = MockServer::start().await;
    call("status")
        .respond_with(response(&format!(
            "<struct><member><name>res</name><value><string>The node ejabberd@localhost is \
             started with status: started\nejabberd {} is running in that node</string>\
             </value></member></struct>",
            version
        )))
        .mount(&server)
        .await;

    let backend = EjabberdXmlRpcBackend::new(XmlRpcConfig {
        uri: server.uri(),
        ..Default::default()
    })
    .unwrap();
    (server, backend)
}

#[tokio::test]
async fn test_api_version() {
    let (_server, backend) = setup("17.01").await;
    assert_eq!(backend.api_version().await.unwrap(), ApiVersion::new(17, 1));
}

#[tokio::test]
async fn test_credentials_precede_arguments() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains(
            "<param><value><struct><member><name>user</name><value><string>admin</string>\
             </value></member><member><name>server</name><value><string>example.com</string>\
             </value></member><member><name>password</name><value><string>secret</string>\
             </value></member><member><name>admin</name><value><boolean>1</boolean></value>\
             </member></struct></value></param><param>",
        ))
        .and(body_string_contains("<methodName>check_account</methodName>"))
        .respond_with(res(0))
        .expect(1)
        .mount(&server)
        .await;

    let backend = EjabberdXmlRpcBackend::new(XmlRpcConfig {
        uri: server.uri(),
        credentials: Some(XmlRpcCredentials {
            user: "admin".to_string(),
            server: "example.com".to_string(),
            password: "secret".to_string(),
        }),
        ..Default::default()
    })
    .unwrap();

    assert!(backend.user_exists("example", "example.com").await.unwrap());
}

#[tokio::test]
async fn test_create_user() {
    let (server, backend) = setup("18.01").await;
    call("register").respond_with(res(0)).expect(1).mount(&server).await;
    call("set_last")
        .and(body_string_contains("<string>Registered</string>"))
        .respond_with(res(0))
        .expect(1)
        .mount(&server)
        .await;

    backend
        .create_user("example", "example.com", "foobar", None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_create_existing_user() {
    let (server, backend) = setup("18.01").await;
    call("register").respond_with(res(1)).mount(&server).await;
    assert_eq!(
        backend.create_user("example", "example.com", "foobar", None).await,
        Err(XmppBackendError::UserExists)
    );

    let (server, backend) = setup("18.01").await;
    call("register")
        .respond_with(fault(-118, "User example@example.com already registered"))
        .mount(&server)
        .await;
    assert_eq!(
        backend.create_user("example", "example.com", "foobar", None).await,
        Err(XmppBackendError::UserExists)
    );
}

#[tokio::test]
async fn test_check_password() {
    let (server, backend) = setup("18.01").await;
    call("check_password")
        .and(body_string_contains("<string>foobar</string>"))
        .respond_with(res(0))
        .mount(&server)
        .await;
    call("check_password")
        .and(body_string_contains("<string>barfoo</string>"))
        .respond_with(res(1))
        .mount(&server)
        .await;

    assert!(backend
        .check_password("example", "example.com", "foobar")
        .await
        .unwrap());
    assert!(!backend
        .check_password("example", "example.com", "barfoo")
        .await
        .unwrap());
}

#[tokio::test]
async fn test_set_password_missing_user() {
    let (server, backend) = setup("18.01").await;
    call("change_password")
        .respond_with(fault(-118, "User does not exist"))
        .mount(&server)
        .await;
    call("check_account").respond_with(res(1)).mount(&server).await;

    let err = backend
        .set_password("example", "example.com", "barfoo")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "example@example.com");
}

#[tokio::test]
async fn test_set_password_checks_existence_on_old_servers() {
    let (server, backend) = setup("16.01").await;
    call("check_account").respond_with(res(1)).mount(&server).await;
    call("change_password").respond_with(res(0)).expect(0).mount(&server).await;

    let err = backend
        .set_password("example", "example.com", "barfoo")
        .await
        .unwrap_err();
    assert!(matches!(err, XmppBackendError::UserNotFound(_)));
}

#[tokio::test]
async fn test_get_last_activity() {
    let expected = NaiveDate::from_ymd_opt(2017, 6, 14)
        .unwrap()
        .and_hms_opt(14, 11, 57)
        .unwrap();

    let (server, backend) = setup("17.01").await;
    call("get_last")
        .respond_with(response(
            "<struct><member><name>last_activity</name><value><string>2017-06-14 14:11:57\
             </string></value></member></struct>",
        ))
        .mount(&server)
        .await;
    assert_eq!(
        backend.get_last_activity("example", "example.com").await.unwrap(),
        Some(expected)
    );

    let (server, backend) = setup("18.01").await;
    call("get_last")
        .respond_with(response(&format!(
            "<struct><member><name>last_activity</name><value><array><data>{}{}</data>\
             </array></value></member></struct>",
            member("timestamp", "<string>2017-06-14T14:11:57Z</string>"),
            member("status", "<string>Logged out</string>"),
        )))
        .mount(&server)
        .await;
    assert_eq!(
        backend.get_last_activity("example", "example.com").await.unwrap(),
        Some(expected)
    );
}

#[tokio::test]
async fn test_get_last_activity_missing_user() {
    let (server, backend) = setup("17.01").await;
    call("get_last")
        .respond_with(response(
            "<struct><member><name>last_activity</name><value><string>Never</string></value>\
             </member></struct>",
        ))
        .mount(&server)
        .await;
    call("check_account").respond_with(res(1)).mount(&server).await;

    let err = backend
        .get_last_activity("example", "example.com")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "example@example.com");
}

#[tokio::test]
async fn test_users_and_domains() {
    let (server, backend) = setup("18.01").await;
    call("registered_users")
        .respond_with(response(&format!(
            "<struct><member><name>users</name><value><array><data>{}{}</data></array>\
             </value></member></struct>",
            member("username", "<string>alice</string>"),
            member("username", "<string>bob</string>"),
        )))
        .mount(&server)
        .await;
    call("registered_vhosts")
        .respond_with(response(&format!(
            "<struct><member><name>vhosts</name><value><array><data>{}</data></array>\
             </value></member></struct>",
            member("vhost", "<string>example.com</string>"),
        )))
        .mount(&server)
        .await;

    let users = backend.all_users("example.com").await.unwrap();
    assert_eq!(users.len(), 2);
    assert!(users.contains("alice"));
    assert_eq!(backend.all_domains().await.unwrap(), vec!["example.com".to_string()]);
}

#[tokio::test]
async fn test_sessions() {
    let (server, backend) = setup("18.01").await;
    let fields = [
        ("connection", "<string>c2s_compressed_tls</string>"),
        ("ip", "<string>::FFFF:10.0.0.1</string>"),
        ("port", "<int>5222</int>"),
        ("priority", "<int>1</int>"),
        ("node", "<string>ejabberd@localhost</string>"),
        ("uptime", "<int>30</int>"),
        ("status", "<string>available</string>"),
        ("resource", "<string>phone</string>"),
        ("statustext", "<string></string>"),
    ];
    call("user_sessions_info")
        .respond_with(response(&format!(
            "<struct><member><name>sessions_info</name><value><array><data>{}</data></array>\
             </value></member></struct>",
            session_entry("session", &fields)
        )))
        .mount(&server)
        .await;

    let mut connected = vec![("jid", "<string>example@example.com/phone</string>")];
    connected.extend_from_slice(&fields);
    call("connected_users_info")
        .respond_with(response(&format!(
            "<struct><member><name>connected_users_info</name><value><array><data>{}</data>\
             </array></value></member></struct>",
            session_entry("sessions", &connected)
        )))
        .mount(&server)
        .await;

    let sessions = backend.user_sessions("example", "example.com").await.unwrap();
    let session = sessions.iter().next().unwrap();
    assert_eq!(session.to_string(), "example@example.com/phone");
    assert_eq!(session.priority, 1);
    assert_eq!(session.connection_type, ConnectionType::Xmpp);
    assert_eq!(session.compressed, Some(true));
    assert_eq!(session.ip_address.to_string(), "10.0.0.1");

    let all = backend.all_user_sessions().await.unwrap();
    assert_eq!(all, sessions);
}

fn string_member(name: &str, value: &str) -> String {
    format!(
        "<member><name>{}</name><value><string>{}</string></value></member>",
        name, value
    )
}

#[tokio::test]
async fn test_remove_user() {
    let (server, backend) = setup("18.01").await;
    call("unregister")
        .and(body_string_contains(string_member("user", "ghost")))
        .respond_with(res(0))
        .expect(1)
        .mount(&server)
        .await;

    backend.remove_user("ghost", "example.com").await.unwrap();
}

#[tokio::test]
async fn test_block_user() {
    let (server, backend) = setup("18.01").await;
    call("ban_account")
        .and(body_string_contains(string_member("reason", "Blocked.")))
        .respond_with(res(0))
        .expect(1)
        .mount(&server)
        .await;
    call("change_password").respond_with(res(0)).expect(0).mount(&server).await;

    backend.block_user("example", "example.com").await.unwrap();
}

#[tokio::test]
async fn test_set_last_activity() {
    let (server, backend) = setup("18.01").await;
    call("set_last")
        .and(body_string_contains(
            "<member><name>timestamp</name><value><int>947071203</int></value></member>",
        ))
        .and(body_string_contains(string_member("status", "away")))
        .respond_with(res(0))
        .expect(1)
        .mount(&server)
        .await;

    let vienna = FixedOffset::east_opt(3600).unwrap();
    let local = vienna.with_ymd_and_hms(2000, 1, 5, 12, 20, 3).unwrap();
    backend
        .set_last_activity("example", "example.com", "away", Some(local.into_utc()))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_message_user() {
    let (server, backend) = setup("18.01").await;
    call("send_message")
        .and(body_string_contains(format!(
            "{}{}{}{}{}",
            string_member("type", "normal"),
            string_member("from", "example.com"),
            string_member("to", "example@example.com"),
            string_member("subject", "Hello"),
            string_member("body", "Welcome!"),
        )))
        .respond_with(res(0))
        .expect(1)
        .mount(&server)
        .await;

    backend
        .message_user("example", "example.com", "Hello", "Welcome!")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_stop_user_session() {
    let (server, backend) = setup("18.01").await;
    call("kick_session")
        .and(body_string_contains(format!(
            "{}{}",
            string_member("resource", "laptop"),
            string_member("reason", "Bye"),
        )))
        .respond_with(res(0))
        .expect(1)
        .mount(&server)
        .await;

    backend
        .stop_user_session("example", "example.com", "laptop", Some("Bye"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_stats() {
    let (server, backend) = setup("18.01").await;
    call("stats")
        .respond_with(response(
            "<struct><member><name>stat</name><value><int>7</int></value></member></struct>",
        ))
        .mount(&server)
        .await;
    assert_eq!(backend.stats(Stat::RegisteredUsers, None).await.unwrap(), 7);
}

#[tokio::test]
async fn test_fault_is_backend_error() {
    let (server, backend) = setup("18.01").await;
    call("unregister")
        .respond_with(fault(-32601, "Unknown call"))
        .mount(&server)
        .await;

    let err = backend.remove_user("example", "example.com").await.unwrap_err();
    assert_eq!(
        err,
        XmppBackendError::Backend("Fault -32601: Unknown call".to_string())
    );
}

#[tokio::test]
async fn test_unreachable_server_is_connection_error() {
    let backend = EjabberdXmlRpcBackend::new(XmlRpcConfig {
        uri: "http://127.0.0.1:1".to_string(),
        timeout: Some(Duration::from_secs(2)),
        ..Default::default()
    })
    .unwrap();

    let err = backend.user_exists("example", "example.com").await.unwrap_err();
    assert!(err.is_connection_error());
}
