//! User credential files: the user JWT followed by its seed.

use crate::error::{Error, Result};

const JWT_BEGIN: &str = "-----BEGIN NATS USER JWT-----";
const JWT_END: &str = "------END NATS USER JWT------";
const SEED_BEGIN: &str = "-----BEGIN USER NKEY SEED-----";
const SEED_END: &str = "------END USER NKEY SEED------";

pub fn format_creds(jwt: &str, seed: &str) -> String {
    format!(
        "{JWT_BEGIN}\n{jwt}\n{JWT_END}\n\n\
         ************************* IMPORTANT *************************\n\
         NKEY Seed printed below can be used to sign and prove identity.\n\
         NKEYs are sensitive and should be treated as secrets.\n\n\
         {SEED_BEGIN}\n{seed}\n{SEED_END}\n\n\
         *************************************************************\n"
    )
}

/// Extract `(jwt, seed)` from a credentials file.
pub fn parse_creds(contents: &str) -> Result<(String, String)> {
    let jwt = block(contents, JWT_BEGIN, JWT_END)
        .ok_or_else(|| Error::IdentityMalformed("credentials file has no user JWT".into()))?;
    let seed = block(contents, SEED_BEGIN, SEED_END)
        .ok_or_else(|| Error::IdentityMalformed("credentials file has no user seed".into()))?;
    Ok((jwt, seed))
}

fn block(contents: &str, begin: &str, end: &str) -> Option<String> {
    let start = contents.find(begin)? + begin.len();
    let rest = &contents[start..];
    let stop = rest.find(end)?;
    rest[..stop]
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}
