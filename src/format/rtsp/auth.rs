use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use log::debug;
use md5::{Digest, Md5};

use super::Method;

/// A parsed `WWW-Authenticate` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    Basic,
    Digest(DigestChallenge),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub qop: Option<String>,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
}

impl DigestChallenge {
    fn is_sess(&self) -> bool {
        self.algorithm
            .as_deref()
            .map_or(false, |a| a.eq_ignore_ascii_case("MD5-sess"))
    }
}

/// Splits `key="value", key=value` lists, honouring commas inside quotes.
fn auth_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut push = |item: &str| {
        if let Some((k, v)) = item.split_once('=') {
            params.push((k.trim().to_ascii_lowercase(), v.trim().trim_matches('"').to_string()));
        }
    };
    for c in input.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            ',' if !quoted => {
                push(&current);
                current.clear();
            }
            _ => current.push(c),
        }
    }
    push(&current);
    params
}

impl Challenge {
    /// Anything that is not a usable Digest challenge falls back to Basic.
    pub fn parse(header: &str) -> Self {
        let header = header.trim();
        let (scheme, rest) = header.split_once(' ').unwrap_or((header, ""));
        if !scheme.eq_ignore_ascii_case("digest") {
            return Challenge::Basic;
        }

        let params = auth_params(rest);
        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .filter(|v| !v.is_empty())
        };

        match (get("realm"), get("nonce")) {
            (Some(realm), Some(nonce)) => {
                let qop = get("qop").map(|offered| {
                    let mut tokens = offered.split(',').map(str::trim).filter(|t| !t.is_empty());
                    let first = tokens.clone().next().unwrap_or("auth").to_string();
                    if tokens.any(|t| t.eq_ignore_ascii_case("auth")) {
                        "auth".to_string()
                    } else {
                        first
                    }
                });
                Challenge::Digest(DigestChallenge {
                    realm,
                    nonce,
                    qop,
                    opaque: get("opaque"),
                    algorithm: get("algorithm"),
                })
            }
            _ => Challenge::Basic,
        }
    }
}

pub fn md5_hex(s: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(s.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn basic_authorization(user: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", user, password)))
}

/// RFC 2617 request-digest.
#[allow(clippy::too_many_arguments)]
pub fn digest_response(
    user: &str,
    password: &str,
    challenge: &DigestChallenge,
    method: &str,
    uri: &str,
    nc: &str,
    cnonce: &str,
) -> String {
    let mut ha1 = md5_hex(&format!("{}:{}:{}", user, challenge.realm, password));
    if challenge.is_sess() {
        ha1 = md5_hex(&format!("{}:{}:{}", ha1, challenge.nonce, cnonce));
    }
    let ha2 = md5_hex(&format!("{}:{}", method, uri));
    match &challenge.qop {
        Some(qop) => md5_hex(&format!("{}:{}:{}:{}:{}:{}", ha1, challenge.nonce, nc, cnonce, qop, ha2)),
        None => md5_hex(&format!("{}:{}:{}", ha1, challenge.nonce, ha2)),
    }
}

/// Computes `Authorization` values for one publish session.
///
/// Tracks the nonce count across requests; it restarts whenever the server
/// hands out a new nonce.
#[derive(Debug, Clone)]
pub struct Authenticator {
    user: String,
    password: String,
    nonce: String,
    nc: u32,
}

impl Authenticator {
    pub fn new(user: &str, password: &str) -> Self {
        Self {
            user: user.to_string(),
            password: password.to_string(),
            nonce: String::new(),
            nc: 0,
        }
    }

    pub fn authorization(&mut self, challenge: &Challenge, method: Method, uri: &str) -> String {
        let digest = match challenge {
            Challenge::Basic => {
                debug!("Building Basic auth for user '{}'", self.user);
                return basic_authorization(&self.user, &self.password);
            }
            Challenge::Digest(digest) => digest,
        };

        if digest.nonce != self.nonce {
            self.nonce = digest.nonce.clone();
            self.nc = 0;
        }
        self.nc += 1;
        let nc = format!("{:08x}", self.nc);
        let cnonce = format!("{:016x}", rand::random::<u64>());
        debug!("Building Digest auth with realm '{}' and nonce '{}'", digest.realm, digest.nonce);

        let response = digest_response(&self.user, &self.password, digest, method.as_str(), uri, &nc, &cnonce);
        let mut header = format!(
            r#"Digest username="{}", realm="{}", nonce="{}", uri="{}", response="{}""#,
            self.user, digest.realm, digest.nonce, uri, response
        );
        if let Some(qop) = &digest.qop {
            header.push_str(&format!(", qop={}", qop));
        }
        if let Some(opaque) = &digest.opaque {
            header.push_str(&format!(r#", opaque="{}""#, opaque));
        }
        if let Some(algorithm) = &digest.algorithm {
            header.push_str(&format!(r#", algorithm="{}""#, algorithm));
        }
        if digest.qop.is_some() {
            header.push_str(&format!(r#", nc={}, cnonce="{}""#, nc, cnonce));
        }
        header
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;

    fn rfc2617_challenge() -> DigestChallenge {
        DigestChallenge {
            realm: "testrealm@host.com".into(),
            nonce: "dcd98b7102dd2f0e8b11d0f600bfb0c093".into(),
            qop: Some("auth".into()),
            opaque: Some("5ccc069c403ebaf9f0171e9517f40e41".into()),
            algorithm: None,
        }
    }

    fn param<'a>(header: &'a str, key: &str) -> Option<&'a str> {
        header
            .trim_start_matches("Digest ")
            .split(", ")
            .filter_map(|p| p.split_once('='))
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.trim_matches('"'))
    }

    #[test]
    fn test_rfc2617_reference_vector() {
        let response = digest_response(
            "Mufasa",
            "Circle Of Life",
            &rfc2617_challenge(),
            "GET",
            "/dir/index.html",
            "00000001",
            "0a4f113b",
        );
        assert_eq!(response, "6629fae49393a05397450978507c4ef1");
    }

    #[quickcheck]
    fn prop_no_qop_matches_rfc2069(user: String, password: String, nonce: String, uri: String) -> bool {
        let challenge = DigestChallenge {
            realm: "realm".into(),
            nonce: nonce.clone(),
            qop: None,
            opaque: None,
            algorithm: None,
        };
        let ha1 = md5_hex(&format!("{}:realm:{}", user, password));
        let ha2 = md5_hex(&format!("ANNOUNCE:{}", uri));
        let expected = md5_hex(&format!("{}:{}:{}", ha1, nonce, ha2));
        digest_response(&user, &password, &challenge, "ANNOUNCE", &uri, "00000001", "x") == expected
    }

    #[test]
    fn test_md5_sess() {
        let mut challenge = rfc2617_challenge();
        challenge.algorithm = Some("MD5-sess".into());
        let ha1 = md5_hex("Mufasa:testrealm@host.com:Circle Of Life");
        let ha1 = md5_hex(&format!("{}:{}:{}", ha1, challenge.nonce, "0a4f113b"));
        let ha2 = md5_hex("GET:/dir/index.html");
        let expected = md5_hex(&format!("{}:{}:00000001:0a4f113b:auth:{}", ha1, challenge.nonce, ha2));
        let response = digest_response(
            "Mufasa",
            "Circle Of Life",
            &challenge,
            "GET",
            "/dir/index.html",
            "00000001",
            "0a4f113b",
        );
        assert_eq!(response, expected);
    }

    #[test]
    fn test_parse_digest_challenge() {
        let challenge = Challenge::parse(
            r#"Digest realm="media, inc", nonce="abc123", qop="auth-int,auth", opaque="xyz", algorithm=MD5-sess"#,
        );
        assert_eq!(
            challenge,
            Challenge::Digest(DigestChallenge {
                realm: "media, inc".into(),
                nonce: "abc123".into(),
                qop: Some("auth".into()),
                opaque: Some("xyz".into()),
                algorithm: Some("MD5-sess".into()),
            })
        );
    }

    #[test]
    fn test_unusable_challenges_fall_back_to_basic() {
        assert_eq!(Challenge::parse(r#"Basic realm="x""#), Challenge::Basic);
        assert_eq!(Challenge::parse(r#"Digest realm="x""#), Challenge::Basic);
        assert_eq!(Challenge::parse(""), Challenge::Basic);
    }

    #[test]
    fn test_basic_header() {
        let mut auth = Authenticator::new("Aladdin", "open sesame");
        assert_eq!(
            auth.authorization(&Challenge::Basic, Method::Announce, "rtsp://h/x"),
            "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ=="
        );
    }

    #[test]
    fn test_digest_header_is_verifiable() {
        let mut auth = Authenticator::new("Mufasa", "Circle Of Life");
        let challenge = rfc2617_challenge();
        let uri = "rtsp://10.0.0.1:554/live";
        let header = auth.authorization(&Challenge::Digest(challenge.clone()), Method::Announce, uri);

        assert_eq!(param(&header, "username"), Some("Mufasa"));
        assert_eq!(param(&header, "uri"), Some(uri));
        assert_eq!(param(&header, "qop"), Some("auth"));
        assert_eq!(param(&header, "nc"), Some("00000001"));
        assert_eq!(param(&header, "opaque"), Some("5ccc069c403ebaf9f0171e9517f40e41"));
        assert_eq!(param(&header, "algorithm"), None);

        let cnonce = param(&header, "cnonce").unwrap();
        let expected = digest_response("Mufasa", "Circle Of Life", &challenge, "ANNOUNCE", uri, "00000001", cnonce);
        assert_eq!(param(&header, "response"), Some(expected.as_str()));
    }

    #[test]
    fn test_nonce_count_resets_on_new_nonce() {
        let mut auth = Authenticator::new("u", "p");
        let mut challenge = rfc2617_challenge();
        let first = auth.authorization(&Challenge::Digest(challenge.clone()), Method::Setup, "rtsp://h/a");
        let second = auth.authorization(&Challenge::Digest(challenge.clone()), Method::Record, "rtsp://h/a");
        assert_eq!(param(&first, "nc"), Some("00000001"));
        assert_eq!(param(&second, "nc"), Some("00000002"));

        challenge.nonce = "fresh".into();
        let third = auth.authorization(&Challenge::Digest(challenge), Method::Record, "rtsp://h/a");
        assert_eq!(param(&third, "nc"), Some("00000001"));
    }
}
