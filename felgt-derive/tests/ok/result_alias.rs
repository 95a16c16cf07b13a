use felgt_derive::Validate;

#[derive(Debug)]
pub struct AddressError(String);

impl From<String> for AddressError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

pub type Result<T> = std::result::Result<T, AddressError>;

#[derive(Validate)]
#[validate_error(AddressError)]
#[validate(non_empty)]
pub struct Address {
    pub street: String,
    pub municipality: String,
}

fn lookup(street: &str) -> Result<Address> {
    Address::new(street.into(), "Mixco".into())
}

fn main() {
    assert!(lookup("Calle 1").is_ok());
    assert!(lookup("").is_err());
}
