use sshpool::errors::OutputError;
use sshpool::output::{clean, extract_json_from_output, EMPTY_OBJECT_SENTINEL};

const INSPECT: &str = "docker container inspect web --format '{{json .}}'";

#[test]
fn terminal_capture_reduces_to_payload_json() {
    let raw = format!(
        "\x1b]0;ops@docker-01: ~\x07ops@docker-01:~$ {}\r\n\
         WARNING: No swap limit support\r\n\
         \x1b[32m{{\"Id\":\"3f2a\",\"State\":{{\"Running\":true}}}}\x1b[0m\r\n\
         ops@docker-01:~$ ",
        INSPECT
    );

    let value = extract_json_from_output(&raw, Some(INSPECT)).expect("json");

    assert_eq!(value["Id"], "3f2a");
    assert_eq!(value["State"]["Running"], true);
}

#[test]
fn html_document_becomes_empty_object_sentinel() {
    let raw = "<!DOCTYPE html>\n<html><head><title>502 Bad Gateway</title></head>\
               <body><h1>502</h1></body></html>";

    assert_eq!(clean(raw, None), EMPTY_OBJECT_SENTINEL);
    let value = extract_json_from_output(raw, None).expect("sentinel parses");
    assert!(value.as_object().is_some_and(|object| object.is_empty()));
}

#[test]
fn ansi2html_wrapped_output_is_unwrapped() {
    let raw = "<pre class=\"ansi2html-content\">{&quot;Containers&quot;: 4}</pre>";

    let value = extract_json_from_output(raw, None).expect("json");

    assert_eq!(value["Containers"], 4);
}

#[test]
fn json_is_dug_out_of_mixed_text() {
    let raw = "Some garbage text here { \"key\": \"value\" } and more garbage here";

    let value = extract_json_from_output(raw, None).expect("json");

    assert_eq!(value["key"], "value");
}

#[test]
fn prose_and_empty_captures_are_errors() {
    assert!(matches!(
        extract_json_from_output("This is not valid JSON data at all", None),
        Err(OutputError::InvalidJson(_))
    ));
    assert_eq!(
        extract_json_from_output("\x1b[0m\r\n  ", None),
        Err(OutputError::EmptyInput)
    );
}

#[test]
fn truncated_json_is_not_accepted() {
    let raw = "{\"Id\": \"3f2a\", \"Config\": {\"Image\": \"nginx\"";

    assert!(extract_json_from_output(raw, None).is_err());
}
