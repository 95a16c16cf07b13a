use felgt_derive::Validate;

#[derive(Validate)]
#[validate(non_empty, no_special_chars)]
pub struct Phrase {
    pub scenario: String,
    pub kind: String,
}

fn main() {
    assert!(Phrase::new("1".into(), "1".into()).is_ok());
    assert!(Phrase::new(" ".into(), "1".into()).is_err());
    assert!(Phrase::new("1".into(), "1;".into()).is_err());
}
