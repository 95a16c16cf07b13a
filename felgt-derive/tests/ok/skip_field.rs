use felgt_derive::Validate;

#[derive(Validate)]
#[validate(non_empty)]
pub struct Recipient {
    pub name: String,
    #[validate(skip)]
    pub notes: String,
    #[validate(skip)]
    pub line: u32,
}

fn main() {
    let r = Recipient::new("Consumidor Final".into(), String::new(), 1);
    assert!(r.is_ok());
}
