use super::*;

#[test]
fn default_channel_is_the_global_one() {
    assert_eq!(ChannelName::default().as_str(), DEFAULT_CHANNEL);
}

#[test]
fn timestamp_keeps_microsecond_precision() {
    let at = DateTime::<Utc>::from_timestamp_micros(1_700_000_000_123_456).expect("valid");
    let stamp = Timestamp::from_datetime(at);
    assert_eq!(stamp, Timestamp(1_700_000_000_123_456));
    assert_eq!(stamp.to_datetime(), Some(at));
}

#[test]
fn maps_url_embeds_coordinates() {
    let point = GeoPoint {
        lat: -33.45,
        lng: -70.66,
    };
    assert_eq!(point.maps_url(), "https://www.google.com/maps?q=-33.45,-70.66");
}

#[test]
fn ids_are_compared_verbatim() {
    assert_ne!(UserId::from("u1"), UserId::from("U1"));
    assert_ne!(UserId::from("u1"), UserId::from(" u1"));
}
