use felgt_derive::Validate;

#[derive(Validate)]
pub struct Establishment {
    pub name: String,
    #[validate(is_country_code)]
    pub country: String,
}

fn main() {
    let e = Establishment::new("Tienda Central".into(), "GT".into());
    assert!(e.is_ok());

    let e = Establishment::new("Tienda Central".into(), "GTM".into());
    assert_eq!(e.err().as_deref(), Some("country must be a valid country code"));
}
