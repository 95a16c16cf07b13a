use felgt_derive::Validate;

#[derive(Debug)]
pub struct FieldError(String);

impl From<String> for FieldError {
    fn from(message: String) -> Self {
        FieldError(message)
    }
}

#[derive(Validate)]
#[validate_error(FieldError)]
pub struct Contact {
    #[validate(non_empty)]
    pub name: String,
    #[validate(email)]
    pub email: Option<String>,
}

fn main() {
    assert!(Contact::new("Ana".into(), None).is_ok());
    assert!(Contact::new("Ana".into(), Some("ana@example.com".into())).is_ok());

    let err = Contact::new("Ana".into(), Some("not-an-address".into()))
        .err()
        .expect("invalid e-mail is rejected");
    assert_eq!(err.0, "email must be a valid e-mail address");
}
