use super::connection::Connection;
use super::record::{Pairs, ProtocolStatus, Record};
use crate::application::Application;
use crate::error::Error;
use crate::request::Request;
use crate::response::{Body, Response};
use crate::status;
use convert_case::{Case, Casing};
use std::collections::BTreeMap;
use std::io::{Read, Write};

// Chunks of a buffered body are sent in records of at most this size
const STDOUT_CHUNK: usize = 32 * 1024;

// Handles one FastCGI connection.
//
// There are two expected flows:
// + A `GetValues` record, which is answered directly.
// + A `BeginRequest` record followed by Params and Stdin. The application's response is sent as
//   Stdout, followed by EndRequest.
pub(crate) fn handle_connection<S: Read + Write>(conn: &mut Connection<S>, app: &Application) {
    let first_record = match conn.read_record() {
        Ok(record) => record,
        Err(err) => return handle_error(conn, err),
    };

    let keep_conn = match first_record {
        Record::GetValues(names) => return handle_get_values(conn, names),
        Record::BeginRequest { keep_conn } => keep_conn,
        _ => {
            log::error!("FastCGI connection began with unexpected record. Closing connection");
            return;
        }
    };

    if keep_conn {
        let end = Record::end_request(0, ProtocolStatus::MultiplexingUnsupported);
        let _ = conn.write_record(&end);
        log::warn!("FastCGI client wanted keep-alive. It is not supported. Closing connection");
        return;
    }

    let vars = match conn.expect_params() {
        Ok(vars) => vars,
        Err(None) => {
            log::error!("FastCGI connection missing Params record. Closing connection");
            return;
        }
        Err(Some(err)) => return handle_error(conn, err),
    };

    let body = match conn.expect_stdin() {
        Ok(body) => body,
        Err(None) => {
            log::error!("FastCGI connection missing Stdin record. Closing connection");
            return;
        }
        Err(Some(err)) => return handle_error(conn, err),
    };

    let Some(mut request) = request_from_vars(vars) else {
        log::error!("FastCGI request missing REQUEST_METHOD. Closing connection");
        return;
    };
    request.body = body;

    let result = match app.call(request) {
        Ok(response) => write_response(conn, response).map(|()| 0),
        Err(err) => {
            log::error!(error:err = err; "Request could not be handled");
            write_failure(conn, &err).map(|()| 1)
        }
    };

    let written = result.and_then(|app_status| {
        let end = Record::end_request(app_status, ProtocolStatus::RequestComplete);
        Ok(conn.write_record(&end)?)
    });

    if let Err(err) = written {
        log::warn!(error:err = err; "Failed to write FastCGI response");
    }
}

// Builds a request from CGI variables.
//
// `HTTP_*` variables become headers: `HTTP_USER_AGENT` is stored as `User-Agent`.
fn request_from_vars(mut vars: Pairs) -> Option<Request> {
    let method = vars.remove("REQUEST_METHOD")?;
    let query_string = vars.remove("QUERY_STRING").unwrap_or_default();

    let path = match vars.remove("PATH_INFO").filter(|p| !p.is_empty()) {
        Some(path) => path,
        None => vars
            .get("DOCUMENT_URI")
            .or_else(|| vars.get("REQUEST_URI"))
            .and_then(|uri| uri.split('?').next())
            .filter(|p| !p.is_empty())
            .unwrap_or("/")
            .to_string(),
    };

    let https = vars
        .get("HTTPS")
        .is_some_and(|v| v.eq_ignore_ascii_case("on") || v == "1");
    let scheme = match vars.get("REQUEST_SCHEME") {
        _ if https => String::from("https"),
        Some(scheme) => scheme.clone(),
        None => String::from("http"),
    };

    let mut headers = BTreeMap::new();
    for (key, value) in vars {
        if let Some(suffix) = key.strip_prefix("HTTP_") {
            headers.insert(suffix.to_case(Case::Train), value);
        } else if key == "CONTENT_TYPE" || key == "CONTENT_LENGTH" {
            // CGI passes these without the prefix
            if !value.is_empty() {
                headers.insert(key.to_case(Case::Train), value);
            }
        }
    }

    Some(Request {
        method,
        path,
        query_string,
        scheme,
        headers,
        body: vec![],
    })
}

fn write_response<S: Read + Write>(conn: &mut Connection<S>, response: Response) -> Result<(), Error> {
    let mut head = vec![];
    response.write_head(&mut head)?;
    conn.write_record(&Record::Stdout(head))?;

    match response.body {
        Body::Bytes(bytes) => {
            for chunk in bytes.chunks(STDOUT_CHUNK) {
                conn.write_record(&Record::Stdout(chunk.to_vec()))?;
            }
        }
        Body::Stream(stream) => {
            for chunk in stream.filter(|c| !c.is_empty()) {
                conn.write_record(&Record::Stdout(chunk))?;
            }
        }
    }

    conn.write_record(&Record::Stdout(vec![]))?;
    Ok(())
}

fn write_failure<S: Read + Write>(conn: &mut Connection<S>, err: &Error) -> Result<(), Error> {
    conn.write_record(&Record::Stderr(err.to_string().into_bytes()))?;
    conn.write_record(&Record::Stderr(vec![]))?;

    let response = Response::default().set_status(status::INTERNAL_SERVER_ERROR);
    write_response(conn, response)
}

fn handle_error<S: Read + Write>(conn: &mut Connection<S>, err: Error) {
    match err {
        Error::UnsupportedRole(_) => {
            let _ = conn.write_record(&Record::end_request(0, ProtocolStatus::UnknownRole));
            log::warn!("FastCGI client requested an unknown role. Closing connection");
        }
        Error::MultiplexingUnsupported => {
            let end = Record::end_request(0, ProtocolStatus::MultiplexingUnsupported);
            let _ = conn.write_record(&end);
            log::warn!("FastCGI client requested connection multiplexing. It is not supported. Closing connection");
        }
        Error::UnknownRecordType(t) => {
            let _ = conn.write_record(&Record::UnknownType(t));
            log::warn!("Unknown record type: {t}. Closing connection");
        }
        err => {
            log::warn!(error:err = err; "Error reading FastCGI record. Closing connection");
        }
    }
}

fn handle_get_values<S: Read + Write>(conn: &mut Connection<S>, names: Pairs) {
    let mut values = Pairs::new();
    // Tell clients that care that connections are not multiplexed
    if names.contains_key("FCGI_MPXS_CONNS") {
        values.insert("FCGI_MPXS_CONNS".to_string(), "0".to_string());
    }
    let _ = conn.write_record(&Record::GetValuesResult(values));
}
