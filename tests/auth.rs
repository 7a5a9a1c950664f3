use regsnipe::auth::{
    credential_from_jwt_body, decode_html, hidden_field, AuthError, Credential, LoginForm,
};

const LOGIN_PAGE: &str = r#"
<form method="post" action="./Login.aspx?subSessionId=abc&amp;currentURL=%2fogrenci" id="form1">
<input type="hidden" name="__VIEWSTATE" id="__VIEWSTATE" value="dDwtMTA4MzE0MjEwNTs7Pg==" />
<input type="hidden" name="__VIEWSTATEGENERATOR" id="__VIEWSTATEGENERATOR" value="C2EE9ABB" />
<input type="hidden" name="__EVENTVALIDATION" id="__EVENTVALIDATION" value="/wEdAAR+x" />
</form>
"#;

#[test]
fn scrapes_login_form() {
    let form = LoginForm::scrape(LOGIN_PAGE);
    assert_eq!(form.view_state, "dDwtMTA4MzE0MjEwNTs7Pg==");
    assert_eq!(form.view_state_generator, "C2EE9ABB");
    assert_eq!(form.event_validation, "/wEdAAR+x");
    assert_eq!(
        form.action,
        "./Login.aspx?subSessionId=abc&currentURL=%2fogrenci"
    );
}

#[test]
fn missing_fields_scrape_empty() {
    let form = LoginForm::scrape("<html><body>maintenance</body></html>");
    assert_eq!(form.view_state, "");
    assert_eq!(form.action, "/Login.aspx");
    // the generator field must not match the plain view state prefix
    assert_eq!(hidden_field(LOGIN_PAGE, "__VIEWSTATE"), "dDwtMTA4MzE0MjEwNTs7Pg==");
}

#[test]
fn repeated_scrapes_read_each_page() {
    let other = LOGIN_PAGE
        .replace("C2EE9ABB", "90059987")
        .replace("./Login.aspx", "/Giris.aspx");
    for _ in 0..3 {
        assert_eq!(LoginForm::scrape(LOGIN_PAGE).view_state_generator, "C2EE9ABB");
        let form = LoginForm::scrape(&other);
        assert_eq!(form.view_state_generator, "90059987");
        assert!(form.action.starts_with("/Giris.aspx?"));
    }
    assert_eq!(hidden_field(LOGIN_PAGE, "__MISSING"), "");
}

#[test]
fn decodes_ampersands() {
    assert_eq!(decode_html("a=1&amp;b=2&amp;c=3"), "a=1&b=2&c=3");
}

#[test]
fn jwt_body_becomes_bearer_credential() {
    let credential = credential_from_jwt_body("eyJhbGciOiJIUzI1NiJ9.eyJzdWIiOiIxIn0.sig\n").unwrap();
    assert_eq!(
        credential.header_value(),
        "Bearer eyJhbGciOiJIUzI1NiJ9.eyJzdWIiOiIxIn0.sig"
    );
    assert_eq!(format!("{credential:?}"), "Credential(<redacted>)");
    assert_eq!(credential, Credential::bearer("eyJhbGciOiJIUzI1NiJ9.eyJzdWIiOiIxIn0.sig"));
}

#[test]
fn html_or_short_jwt_body_is_rejected() {
    assert!(matches!(
        credential_from_jwt_body("<!DOCTYPE html><html>login</html>"),
        Err(AuthError::Rejected(_))
    ));
    assert!(matches!(credential_from_jwt_body("null"), Err(AuthError::Rejected(_))));
}
