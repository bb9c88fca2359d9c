//! Static client-location to region lookup.

/// ISO 3166-1 alpha-2 country code to region id.
const COUNTRY_REGIONS: &[(&str, &str)] = &[
    ("US", "iad"),
    ("CA", "iad"),
    ("MX", "iad"),
    ("BR", "gru"),
    ("AR", "gru"),
    ("CL", "gru"),
    ("CO", "gru"),
    ("PE", "gru"),
    ("GB", "lhr"),
    ("IE", "lhr"),
    ("FR", "lhr"),
    ("DE", "lhr"),
    ("NL", "lhr"),
    ("ES", "lhr"),
    ("IT", "lhr"),
    ("PT", "lhr"),
    ("BE", "lhr"),
    ("SE", "lhr"),
    ("NO", "lhr"),
    ("DK", "lhr"),
    ("FI", "lhr"),
    ("PL", "lhr"),
    ("CH", "lhr"),
    ("AT", "lhr"),
    ("IN", "bom"),
    ("PK", "bom"),
    ("BD", "bom"),
    ("LK", "bom"),
    ("AE", "bom"),
    ("SA", "bom"),
    ("SG", "sin"),
    ("MY", "sin"),
    ("ID", "sin"),
    ("TH", "sin"),
    ("VN", "sin"),
    ("PH", "sin"),
    ("JP", "nrt"),
    ("KR", "nrt"),
    ("TW", "nrt"),
    ("HK", "nrt"),
    ("CN", "nrt"),
    ("AU", "syd"),
    ("NZ", "syd"),
    ("ZA", "jnb"),
    ("NG", "jnb"),
    ("KE", "jnb"),
    ("EG", "jnb"),
];

/// IANA zones checked before the continent prefixes below.
const TIMEZONE_REGIONS: &[(&str, &str)] = &[
    ("Asia/Kolkata", "bom"),
    ("Asia/Calcutta", "bom"),
    ("Asia/Karachi", "bom"),
    ("Asia/Dhaka", "bom"),
    ("Asia/Dubai", "bom"),
    ("Asia/Riyadh", "bom"),
    ("Asia/Singapore", "sin"),
    ("Asia/Kuala_Lumpur", "sin"),
    ("Asia/Jakarta", "sin"),
    ("Asia/Bangkok", "sin"),
    ("Asia/Ho_Chi_Minh", "sin"),
    ("Asia/Manila", "sin"),
    ("Asia/Tokyo", "nrt"),
    ("Asia/Seoul", "nrt"),
    ("Asia/Taipei", "nrt"),
    ("Asia/Hong_Kong", "nrt"),
    ("Asia/Shanghai", "nrt"),
    ("America/Sao_Paulo", "gru"),
    ("America/Argentina/Buenos_Aires", "gru"),
    ("America/Buenos_Aires", "gru"),
    ("America/Santiago", "gru"),
    ("America/Bogota", "gru"),
    ("America/Lima", "gru"),
];

const TIMEZONE_PREFIXES: &[(&str, &str)] = &[
    ("America/", "iad"),
    ("US/", "iad"),
    ("Canada/", "iad"),
    ("Europe/", "lhr"),
    ("Africa/", "jnb"),
    ("Australia/", "syd"),
    ("Pacific/Auckland", "syd"),
];

pub fn region_for_country(country: &str) -> Option<&'static str> {
    let country = country.trim();
    COUNTRY_REGIONS
        .iter()
        .find(|(code, _)| code.eq_ignore_ascii_case(country))
        .map(|(_, region)| *region)
}

pub fn region_for_timezone(timezone: &str) -> Option<&'static str> {
    let timezone = timezone.trim();
    TIMEZONE_REGIONS
        .iter()
        .find(|(zone, _)| *zone == timezone)
        .or_else(|| {
            TIMEZONE_PREFIXES
                .iter()
                .find(|(prefix, _)| timezone.starts_with(prefix))
        })
        .map(|(_, region)| *region)
}
