use felgt_derive::Validate;

#[derive(Validate)]
pub struct Taxpayer {
    #[validate(nit)]
    pub nit: String,
}

fn main() {
    assert!(Taxpayer::new("CF".into()).is_ok());
    assert!(Taxpayer::new("1234567-9".into()).is_ok());
    assert!(Taxpayer::new("12345679".into()).is_ok());
    assert!(Taxpayer::new("1000002K".into()).is_ok());
    assert!(Taxpayer::new("1000002k".into()).is_ok());

    assert!(Taxpayer::new("12345678".into()).is_err());
    assert!(Taxpayer::new("K".into()).is_err());
    assert!(Taxpayer::new("ABC".into()).is_err());
    assert!(Taxpayer::new(String::new()).is_err());
}
