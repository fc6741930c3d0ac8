use super::StreamError;
use crate::config::Endpoint;
use url::Url;

pub const DEFAULT_TAIL_LEN: u32 = 256;

/// Where the server should start replaying on a (re)connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    FromSeq(u64),
    LastN(u32),
}

impl Resume {
    /// `from_seq = cursor + 1` once anything has been seen, otherwise the recent tail.
    pub fn for_cursor(cursor: u64, tail_len: u32) -> Self {
        if cursor > 0 {
            Resume::FromSeq(cursor.saturating_add(1))
        } else {
            Resume::LastN(tail_len)
        }
    }
}

/// `ws(s)://host[/prefix]/ws/events/{session_id}?<resume>&ticket=<ticket>`.
pub fn stream_url(
    endpoint: &Endpoint,
    session_id: &str,
    ticket: &str,
    resume: Resume,
) -> Result<Url, StreamError> {
    let mut url = endpoint.base_url().clone();
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(StreamError::InvalidEndpoint(format!(
                "unsupported scheme '{other}'"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| StreamError::InvalidEndpoint(format!("cannot use scheme {scheme}")))?;
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|_| StreamError::InvalidEndpoint("base url cannot carry a path".into()))?
        .pop_if_empty()
        .extend(["ws", "events", session_id]);
    {
        let mut query = url.query_pairs_mut();
        match resume {
            Resume::FromSeq(seq) => query.append_pair("from_seq", &seq.to_string()),
            Resume::LastN(n) => query.append_pair("last_n", &n.to_string()),
        };
        query.append_pair("ticket", ticket);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(base: &str) -> Endpoint {
        Endpoint::new(base, None).unwrap()
    }

    #[test]
    fn fresh_attach_requests_tail() {
        assert_eq!(Resume::for_cursor(0, DEFAULT_TAIL_LEN), Resume::LastN(256));
        let url = stream_url(
            &endpoint("http://127.0.0.1:8787"),
            "s1",
            "t-1",
            Resume::for_cursor(0, DEFAULT_TAIL_LEN),
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "ws://127.0.0.1:8787/ws/events/s1?last_n=256&ticket=t-1"
        );
    }

    #[test]
    fn stored_cursor_resumes_after_it() {
        assert_eq!(Resume::for_cursor(57, DEFAULT_TAIL_LEN), Resume::FromSeq(58));
        assert_eq!(Resume::for_cursor(60, DEFAULT_TAIL_LEN), Resume::FromSeq(61));
        let url = stream_url(
            &endpoint("https://rc.example.com/prefix/"),
            "abc",
            "t+2",
            Resume::FromSeq(58),
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "wss://rc.example.com/prefix/ws/events/abc?from_seq=58&ticket=t%2B2"
        );
    }
}
